//! Provider authentication producing an XOAUTH2 bearer assertion.
//!
//! [`Authenticator::authenticate`] runs the same protocol for every [`Provider`]:
//!
//! 1. Try the [`CredentialStore`]. A fresh or silently refreshed credential is used
//!    as-is.
//! 2. Otherwise start the one-shot [listener](crate::listener), send the user to
//!    the consent page through a [`ConsentPrompt`], and wait for the redirect
//!    within the configured authorization deadline.
//! 3. Exchange the code, resolve the account, and persist the new credential.

use crate::credential::{Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::listener;
use crate::provider::Provider;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// SASL XOAUTH2 initial response: `user=<account>\x01auth=Bearer <token>\x01\x01`.
#[derive(Clone)]
pub struct BearerAssertion {
    account: String,
    encoded: SecretString,
}

impl BearerAssertion {
    /// Builds the assertion for `account` and `access_token`.
    #[must_use]
    pub fn new(account: impl Into<String>, access_token: &str) -> Self {
        let account = account.into();
        let encoded = format!("user={account}\x01auth=Bearer {access_token}\x01\x01");
        Self {
            account,
            encoded: SecretString::from(encoded),
        }
    }

    /// The account the assertion authenticates.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// The exact bytes sent to the mail server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.encoded.expose_secret()
    }
}

impl std::fmt::Debug for BearerAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAssertion")
            .field("account", &self.account)
            .field("encoded", &"[REDACTED]")
            .finish()
    }
}

/// Directs the user to a provider consent page.
///
/// Opening a browser is a presentation concern; implement this to open one, print
/// the URL, or (in tests) follow the redirect programmatically.
pub trait ConsentPrompt: Send + Sync {
    /// Presents `url` to the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be presented; authentication is aborted.
    fn present(&self, url: &Url) -> Result<()>;
}

/// Logs the consent URL at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConsentPrompt;

impl ConsentPrompt for LogConsentPrompt {
    fn present(&self, url: &Url) -> Result<()> {
        info!(url = %url, "Open this URL in a browser to authorize mailbox access");
        Ok(())
    }
}

/// Drives the OAuth2 flow for one provider.
#[derive(Clone)]
pub struct Authenticator {
    provider: Provider,
    store: CredentialStore,
    http: reqwest::Client,
    listener_port: u16,
    authorization_timeout: Duration,
    prompt: Arc<dyn ConsentPrompt>,
    force_relogin: bool,
}

impl Authenticator {
    /// Creates an authenticator.
    ///
    /// `listener_port` is where the local redirect listener binds; it must match a
    /// redirect URI registered with the provider. `authorization_timeout` bounds the
    /// wait for the user to finish consent.
    #[must_use]
    pub fn new(
        provider: Provider,
        store: CredentialStore,
        http: reqwest::Client,
        listener_port: u16,
        authorization_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            http,
            listener_port,
            authorization_timeout,
            prompt: Arc::new(LogConsentPrompt),
            force_relogin: false,
        }
    }

    /// Replaces the default [`LogConsentPrompt`].
    #[must_use]
    pub fn with_consent_prompt(mut self, prompt: Arc<dyn ConsentPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Discards any cached credential before authenticating.
    #[must_use]
    pub fn force_relogin(mut self, force: bool) -> Self {
        self.force_relogin = force;
        self
    }

    /// Returns the provider this authenticator serves.
    #[must_use]
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Produces a bearer assertion, interactively if no usable credential is cached.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthorizationTimeout`] if consent is not completed in time
    /// - [`Error::AuthorizationDenied`] if the redirect carried no code
    /// - [`Error::TokenRejected`] / [`Error::TokenRequest`] if the code exchange fails
    /// - [`Error::AccountLookup`] if the account cannot be determined
    /// - [`Error::CredentialWrite`] if the new credential cannot be persisted
    #[instrument(
        name = "auth::authenticate",
        skip_all,
        fields(provider = self.provider.name(), force_relogin = self.force_relogin)
    )]
    pub async fn authenticate(&self) -> Result<BearerAssertion> {
        if self.force_relogin {
            self.store.discard().await?;
        }

        let scopes = self.provider.scopes();

        let credential = match self.store.load(&scopes).await {
            Some(credential) => {
                debug!(account = %credential.account, "Authenticated silently");
                credential
            }
            None => self.authorize_interactively(&scopes).await?,
        };

        Ok(BearerAssertion::new(
            credential.account,
            &credential.access_token,
        ))
    }

    async fn authorize_interactively(&self, scopes: &[String]) -> Result<Credential> {
        // Listen before sending the user off, so a fast redirect is not missed
        let handle = listener::start(self.listener_port).await?;
        let redirect_uri = handle.redirect_uri();

        let url = self.provider.authorization_url(&redirect_uri, scopes)?;
        self.prompt.present(&url)?;

        info!(
            timeout_secs = self.authorization_timeout.as_secs(),
            "Waiting for authorization redirect"
        );

        let code = tokio::time::timeout(self.authorization_timeout, handle.retrieve_code())
            .await
            .map_err(|_| Error::AuthorizationTimeout {
                timeout: self.authorization_timeout,
            })?
            .ok_or(Error::AuthorizationDenied)?;

        let oauth = self.provider.oauth_client(self.http.clone())?;
        let tokens = oauth
            .exchange_code(&code.code, &redirect_uri, scopes)
            .await?;
        let account = self.provider.resolve_account(&self.http, &tokens).await?;

        let credential = Credential::from_tokens(tokens, scopes, account);
        self.store.save(&credential).await?;

        info!(account = %credential.account, "Authorization completed");
        Ok(credential)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("provider", &self.provider.name())
            .field("credential_path", &self.store.path())
            .field("listener_port", &self.listener_port)
            .field("authorization_timeout", &self.authorization_timeout)
            .field("force_relogin", &self.force_relogin)
            .finish_non_exhaustive()
    }
}
