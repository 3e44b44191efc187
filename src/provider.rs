//! Mail providers and their OAuth2 / IMAP endpoints.
//!
//! A [`Provider`] is a tagged variant over the supported services. Each variant
//! carries its own settings; everything provider-specific (scopes, endpoints,
//! account resolution) is dispatched from here so the rest of the crate never
//! branches on provider names.
//!
//! # Example
//!
//! ```
//! use mail_insight::provider::{OutlookSettings, Provider};
//!
//! let provider = Provider::Outlook(OutlookSettings::new("client-id", "contoso.onmicrosoft.com")?);
//! assert_eq!(provider.mail_endpoint().address(), "outlook.office365.com:993");
//! # Ok::<(), mail_insight::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::oauth::{OAuthClient, TokenSet};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use email_address::EmailAddress;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use url::Url;

/// Scopes requested for Gmail IMAP access.
pub const GMAIL_SCOPES: &[&str] = &["https://mail.google.com/"];

/// Scopes requested for Outlook IMAP access.
///
/// `offline_access` yields a refresh token, `openid profile` an ID token carrying the UPN.
pub const OUTLOOK_SCOPES: &[&str] = &[
    "https://outlook.office.com/IMAP.AccessAsUser.All",
    "offline_access",
    "openid",
    "profile",
];

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GMAIL_PROFILE_URI: &str = "https://gmail.googleapis.com/gmail/v1/users/me/profile";
const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Host and port of a provider's IMAPS endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEndpoint {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (993 for IMAPS).
    pub port: u16,
}

impl MailEndpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the endpoint as "host:port".
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Gmail OAuth2 client settings.
#[derive(Clone)]
pub struct GmailSettings {
    /// OAuth2 client ID.
    pub client_id: String,
    client_secret: SecretString,
    /// Consent page URL.
    pub auth_uri: String,
    /// Token endpoint URL.
    pub token_uri: String,
    /// Gmail profile endpoint used to resolve the account address.
    pub profile_uri: String,
}

/// Google's client secrets file layout (`credentials.json`).
#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecretsEntry>,
    web: Option<ClientSecretsEntry>,
}

#[derive(Deserialize)]
struct ClientSecretsEntry {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

impl GmailSettings {
    /// Creates Gmail settings from a client ID and secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if either value is empty.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = require_non_empty(client_id.into(), "gmail client_id")?;
        let client_secret = require_non_empty(client_secret.into(), "gmail client_secret")?;
        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            profile_uri: GMAIL_PROFILE_URI.to_string(),
        })
    }

    /// Loads settings from a Google client secrets JSON file (`installed` or `web` app).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing, unreadable, or malformed.
    pub fn from_client_secrets_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ClientSecretsRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ClientSecretsFile =
            serde_json::from_str(&raw).map_err(|source| Error::ClientSecretsFormat {
                path: path.to_path_buf(),
                source,
            })?;
        let entry = file.installed.or(file.web).ok_or_else(|| Error::InvalidConfig {
            message: format!(
                "{} has neither an 'installed' nor a 'web' client",
                path.display()
            ),
        })?;

        let mut settings = Self::new(entry.client_id, entry.client_secret)?;
        if let Some(auth_uri) = entry.auth_uri {
            settings.auth_uri = auth_uri;
        }
        if let Some(token_uri) = entry.token_uri {
            settings.token_uri = token_uri;
        }
        Ok(settings)
    }

    /// Overrides the profile endpoint.
    #[must_use]
    pub fn with_profile_uri(mut self, profile_uri: impl Into<String>) -> Self {
        self.profile_uri = profile_uri.into();
        self
    }
}

impl std::fmt::Debug for GmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .field("profile_uri", &self.profile_uri)
            .finish()
    }
}

/// Outlook (Microsoft identity platform) OAuth2 client settings.
#[derive(Clone)]
pub struct OutlookSettings {
    /// Azure application (client) ID.
    pub client_id: String,
    /// Directory tenant ID or domain (`common` and `organizations` also work).
    pub tenant: String,
    client_secret: Option<SecretString>,
    /// Identity platform base URL.
    pub authority: String,
}

impl OutlookSettings {
    /// Creates Outlook settings for a public client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the client ID or tenant is empty.
    pub fn new(client_id: impl Into<String>, tenant: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client_id: require_non_empty(client_id.into(), "outlook client_id")?,
            tenant: require_non_empty(tenant.into(), "outlook tenant")?,
            client_secret: None,
            authority: MICROSOFT_AUTHORITY.to_string(),
        })
    }

    /// Sets a client secret for confidential client registrations.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Overrides the identity platform base URL.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{leaf}",
            self.authority.trim_end_matches('/'),
            self.tenant
        )
    }
}

impl std::fmt::Debug for OutlookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlookSettings")
            .field("client_id", &self.client_id)
            .field("tenant", &self.tenant)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("authority", &self.authority)
            .finish()
    }
}

/// A supported mail provider together with its settings.
#[derive(Debug, Clone)]
pub enum Provider {
    /// Google Gmail.
    Gmail(GmailSettings),
    /// Microsoft Outlook / Office 365.
    Outlook(OutlookSettings),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailProfile {
    email_address: String,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    upn: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
}

impl Provider {
    /// Short lowercase provider name, used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gmail(_) => "gmail",
            Provider::Outlook(_) => "outlook",
        }
    }

    /// Scopes requested during authorization.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        let scopes = match self {
            Provider::Gmail(_) => GMAIL_SCOPES,
            Provider::Outlook(_) => OUTLOOK_SCOPES,
        };
        scopes.iter().map(|s| (*s).to_string()).collect()
    }

    /// The provider's IMAPS endpoint.
    #[must_use]
    pub fn mail_endpoint(&self) -> MailEndpoint {
        match self {
            Provider::Gmail(_) => MailEndpoint::new("imap.gmail.com", 993),
            Provider::Outlook(_) => MailEndpoint::new("outlook.office365.com", 993),
        }
    }

    /// Default location of the persisted credential for this provider.
    #[must_use]
    pub fn default_credential_path(&self) -> PathBuf {
        match self {
            Provider::Gmail(_) => PathBuf::from("token.json"),
            Provider::Outlook(_) => PathBuf::from("msal_token.json"),
        }
    }

    /// Builds the consent page URL the user is sent to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the configured authorization endpoint is not a URL.
    pub fn authorization_url(&self, redirect_uri: &str, scopes: &[String]) -> Result<Url> {
        let scope = scopes.join(" ");
        let (endpoint, client_id) = match self {
            Provider::Gmail(s) => (s.auth_uri.clone(), s.client_id.as_str()),
            Provider::Outlook(s) => (s.endpoint("authorize"), s.client_id.as_str()),
        };

        let mut params = vec![
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
        ];
        match self {
            Provider::Gmail(_) => {
                // Google only issues a refresh token on offline, forced-consent requests
                params.push(("access_type", "offline"));
                params.push(("prompt", "consent"));
            }
            Provider::Outlook(_) => params.push(("response_mode", "query")),
        }

        Url::parse_with_params(&endpoint, &params).map_err(|source| Error::InvalidUrl {
            url: endpoint,
            source,
        })
    }

    /// Builds a token endpoint client for this provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the configured token endpoint is not a URL.
    pub fn oauth_client(&self, http: reqwest::Client) -> Result<OAuthClient> {
        let (token_uri, client_id, secret) = match self {
            Provider::Gmail(s) => (
                s.token_uri.clone(),
                s.client_id.clone(),
                Some(s.client_secret.clone()),
            ),
            Provider::Outlook(s) => (
                s.endpoint("token"),
                s.client_id.clone(),
                s.client_secret.clone(),
            ),
        };
        let url = parse_url(&token_uri)?;
        Ok(OAuthClient::new(http, url, client_id, secret))
    }

    /// Determines the mailbox account a freshly issued token set belongs to.
    ///
    /// Gmail asks the profile endpoint; Outlook reads the ID token claims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountLookup`] if no valid email address can be determined,
    /// or [`Error::HttpRequest`] if the profile endpoint is unreachable.
    #[instrument(name = "provider::resolve_account", skip_all, fields(provider = self.name()))]
    pub async fn resolve_account(
        &self,
        http: &reqwest::Client,
        tokens: &TokenSet,
    ) -> Result<String> {
        let account = match self {
            Provider::Gmail(s) => fetch_gmail_address(http, &s.profile_uri, tokens).await?,
            Provider::Outlook(_) => account_from_id_token(tokens)?,
        };

        if !EmailAddress::is_valid(&account) {
            return Err(Error::AccountLookup {
                message: format!("'{account}' is not an email address"),
            });
        }

        debug!(account = %account, "Resolved account");
        Ok(account)
    }
}

async fn fetch_gmail_address(
    http: &reqwest::Client,
    profile_uri: &str,
    tokens: &TokenSet,
) -> Result<String> {
    let response = http
        .get(profile_uri)
        .bearer_auth(&tokens.access_token)
        .send()
        .await
        .map_err(|source| Error::HttpRequest {
            endpoint: profile_uri.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::AccountLookup {
            message: format!("profile endpoint returned status {status}"),
        });
    }

    let profile: GmailProfile = response.json().await.map_err(|source| Error::HttpRequest {
        endpoint: profile_uri.to_string(),
        source,
    })?;
    Ok(profile.email_address)
}

fn account_from_id_token(tokens: &TokenSet) -> Result<String> {
    let lookup_err = |message: &str| Error::AccountLookup {
        message: message.to_string(),
    };

    let id_token = tokens
        .id_token
        .as_deref()
        .ok_or_else(|| lookup_err("token response has no id_token"))?;
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| lookup_err("id_token is not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| lookup_err("id_token payload is not base64url"))?;
    let claims: IdTokenClaims =
        serde_json::from_slice(&bytes).map_err(|_| lookup_err("id_token payload is not JSON"))?;

    claims
        .upn
        .or(claims.preferred_username)
        .or(claims.email)
        .ok_or_else(|| lookup_err("id_token has no upn, preferred_username, or email claim"))
}

fn require_non_empty(value: String, what: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::InvalidConfig {
            message: format!("{what} is required"),
        });
    }
    Ok(value)
}

pub(crate) fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|source| Error::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}
