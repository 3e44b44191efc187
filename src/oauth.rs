//! OAuth2 token endpoint client.
//!
//! Handles the two grants the authenticator needs: exchanging an authorization code
//! for a token set, and silently refreshing an access token with a refresh token.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

/// Lifetime assumed when a token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Token set returned by a provider token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    /// Bearer access token.
    pub access_token: String,
    /// Long-lived refresh token, if the provider issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Space-separated scopes actually granted.
    #[serde(default)]
    pub scope: Option<String>,
    /// OpenID Connect ID token (Outlook).
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenSet {
    /// Absolute expiry of the access token, measured from `issued_at`.
    #[must_use]
    pub fn expiry_from(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let secs = i64::from(u32::try_from(secs).unwrap_or(u32::MAX));
        issued_at + chrono::Duration::seconds(secs)
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("has_id_token", &self.id_token.is_some())
            .finish()
    }
}

/// Client for a provider's OAuth2 token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: Option<SecretString>,
}

impl OAuthClient {
    /// Creates a token endpoint client.
    ///
    /// `client_secret` is optional because public clients (Outlook desktop apps)
    /// authenticate with the client ID alone.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Returns the token endpoint URL.
    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchanges an authorization code for a token set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenRejected`] if the endpoint refuses the code and
    /// [`Error::TokenRequest`] if it cannot be reached.
    #[instrument(name = "oauth::exchange_code", skip_all, fields(token_url = %self.token_url))]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<TokenSet> {
        let params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("scope", scopes.join(" ")),
        ];
        self.request("authorization_code", params).await
    }

    /// Obtains a fresh access token using a refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenRejected`] if the refresh token is no longer honoured and
    /// [`Error::TokenRequest`] on connectivity problems.
    #[instrument(name = "oauth::refresh", skip_all, fields(token_url = %self.token_url))]
    pub async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenSet> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("scope", scopes.join(" ")),
        ];
        self.request("refresh_token", params).await
    }

    async fn request(
        &self,
        grant: &'static str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<TokenSet> {
        params.push(("client_id", self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.expose_secret().to_string()));
        }

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|source| Error::TokenRequest { grant, source })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::TokenRejected {
                grant,
                status: status.as_u16(),
                message,
            });
        }

        let tokens: TokenSet = response
            .json()
            .await
            .map_err(|source| Error::TokenRequest { grant, source })?;

        debug!(
            grant,
            expires_in = ?tokens.expires_in,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Token endpoint issued tokens"
        );

        Ok(tokens)
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}
