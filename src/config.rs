//! Configuration for the mail analysis pipeline.
//!
//! Use [`PipelineConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use mail_insight::PipelineConfig;
//! use mail_insight::provider::{OutlookSettings, Provider};
//!
//! let provider = Provider::Outlook(OutlookSettings::new("client-id", "contoso.onmicrosoft.com")?);
//! let config = PipelineConfig::builder()
//!     .provider(provider)
//!     .limit(20)
//!     .build()?;
//!
//! assert_eq!(config.folder, "INBOX");
//! # Ok::<(), mail_insight::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::provider::{MailEndpoint, Provider};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of most recent messages analyzed per run.
pub const DEFAULT_LIMIT: usize = 50;

/// Default port of the local authorization redirect listener.
pub const DEFAULT_LISTENER_PORT: u16 = 8080;

/// Default base URL of the natural-language analysis API.
pub const DEFAULT_ANALYSIS_ENDPOINT: &str = "https://language.googleapis.com/v1";

/// Service account key file looked up when no other analysis credential is set.
pub const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "credentials_nlp.json";

/// Configuration for one pipeline run.
///
/// Create using [`PipelineConfig::builder()`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Mail provider and its OAuth2 client settings.
    pub provider: Provider,
    /// Mailbox folder to read.
    pub folder: String,
    /// Maximum number of (most recent) messages to analyze.
    pub limit: usize,
    /// Location of the persisted credential.
    pub credential_path: PathBuf,
    /// Port of the local authorization redirect listener.
    pub listener_port: u16,
    /// Discard the cached credential and authorize interactively.
    pub force_relogin: bool,
    /// IMAP server hostname override.
    pub imap_host: Option<String>,
    /// IMAP server port override.
    pub imap_port: Option<u16>,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl PipelineConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Returns the IMAP endpoint to connect to, applying any overrides.
    #[must_use]
    pub fn mail_endpoint(&self) -> MailEndpoint {
        let default = self.provider.mail_endpoint();
        MailEndpoint {
            host: self.imap_host.clone().unwrap_or(default.host),
            port: self.imap_port.unwrap_or(default.port),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for searching a mailbox.
    pub search: Duration,
    /// Timeout for fetching one message.
    pub message_fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
    /// How long the user has to complete interactive consent.
    pub authorization: Duration,
    /// Timeout for OAuth2 and profile HTTP requests.
    pub http: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            message_fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
            authorization: Duration::from_secs(300), // 5 minutes
            http: Duration::from_secs(30),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    provider: Option<Provider>,
    folder: Option<String>,
    limit: Option<usize>,
    credential_path: Option<PathBuf>,
    listener_port: Option<u16>,
    force_relogin: bool,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    timeouts: Option<TimeoutConfig>,
}

impl PipelineConfigBuilder {
    /// Sets the mail provider (required).
    #[must_use]
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the folder to read. Default is `INBOX`.
    #[must_use]
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Sets the maximum number of messages to analyze. Default is 50.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the credential file location.
    ///
    /// Defaults to `token.json` for Gmail and `msal_token.json` for Outlook.
    #[must_use]
    pub fn credential_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_path = Some(path.into());
        self
    }

    /// Sets the local redirect listener port. Default is 8080.
    #[must_use]
    pub fn listener_port(mut self, port: u16) -> Self {
        self.listener_port = Some(port);
        self
    }

    /// Discards any cached credential before authenticating.
    #[must_use]
    pub fn force_relogin(mut self, force: bool) -> Self {
        self.force_relogin = force;
        self
    }

    /// Overrides the provider's IMAP hostname.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Overrides the provider's IMAP port.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets how long to wait for the user to complete consent.
    #[must_use]
    pub fn authorization_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .authorization = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the provider is missing, the limit is
    /// zero, or the folder name is empty.
    pub fn build(self) -> Result<PipelineConfig> {
        let provider = self.provider.ok_or_else(|| Error::InvalidConfig {
            message: "provider is required".into(),
        })?;

        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 {
            return Err(Error::InvalidConfig {
                message: "limit must be greater than zero".into(),
            });
        }

        let folder = self.folder.unwrap_or_else(|| "INBOX".to_string());
        if folder.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "folder must not be empty".into(),
            });
        }

        let credential_path = self
            .credential_path
            .unwrap_or_else(|| provider.default_credential_path());

        Ok(PipelineConfig {
            provider,
            folder,
            limit,
            credential_path,
            listener_port: self.listener_port.unwrap_or(DEFAULT_LISTENER_PORT),
            force_relogin: self.force_relogin,
            imap_host: self.imap_host,
            imap_port: self.imap_port,
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

/// How requests to the analysis API are authorized.
#[derive(Clone)]
pub enum AnalysisCredential {
    /// API key passed as the `key` query parameter.
    ApiKey(SecretString),
    /// OAuth2 access token sent as a bearer token.
    AccessToken(SecretString),
    /// Google service account key file. Bearer tokens are minted from it and
    /// renewed before they expire.
    ServiceAccount(PathBuf),
}

impl std::fmt::Debug for AnalysisCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisCredential::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            AnalysisCredential::AccessToken(_) => f.write_str("AccessToken([REDACTED])"),
            AnalysisCredential::ServiceAccount(path) => f
                .debug_tuple("ServiceAccount")
                .field(&path.display())
                .finish(),
        }
    }
}

/// Settings for the HTTP natural-language analysis service.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// API base URL, e.g. `https://language.googleapis.com/v1`.
    pub endpoint: String,
    /// Request authorization.
    pub credential: AnalysisCredential,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AnalysisConfig {
    /// Environment variable holding an API key.
    pub const API_KEY_VAR: &'static str = "MAIL_INSIGHT_NLP_API_KEY";
    /// Environment variable holding an OAuth2 access token.
    pub const ACCESS_TOKEN_VAR: &'static str = "MAIL_INSIGHT_NLP_ACCESS_TOKEN";
    /// Environment variable holding the path of a service account key file.
    pub const SERVICE_ACCOUNT_VAR: &'static str = "MAIL_INSIGHT_NLP_CREDENTIALS";
    /// Environment variable overriding the API base URL.
    pub const ENDPOINT_VAR: &'static str = "MAIL_INSIGHT_NLP_ENDPOINT";

    /// Creates settings for the default endpoint.
    #[must_use]
    pub fn new(credential: AnalysisCredential) -> Self {
        Self {
            endpoint: DEFAULT_ANALYSIS_ENDPOINT.to_string(),
            credential,
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the API base URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Settings authorized by the service account key at `path`.
    ///
    /// Returns `None` if there is no file at `path`. The key itself is only parsed
    /// when the service client is built.
    #[must_use]
    pub fn from_service_account_file(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        path.is_file()
            .then(|| Self::new(AnalysisCredential::ServiceAccount(path.to_path_buf())))
    }

    /// Reads settings from the environment.
    ///
    /// Credentials are tried in order: API key, access token, then the service
    /// account key file named by `MAIL_INSIGHT_NLP_CREDENTIALS` (default
    /// [`DEFAULT_SERVICE_ACCOUNT_FILE`]). Returns `None` when none is present,
    /// meaning analysis is unavailable.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let credential = present(Self::API_KEY_VAR)
            .map(|key| AnalysisCredential::ApiKey(SecretString::from(key)))
            .or_else(|| {
                present(Self::ACCESS_TOKEN_VAR)
                    .map(|token| AnalysisCredential::AccessToken(SecretString::from(token)))
            })
            .or_else(|| {
                let path = present(Self::SERVICE_ACCOUNT_VAR)
                    .map_or_else(|| PathBuf::from(DEFAULT_SERVICE_ACCOUNT_FILE), PathBuf::from);
                path.is_file()
                    .then_some(AnalysisCredential::ServiceAccount(path))
            })?;

        let mut config = Self::new(credential);
        if let Some(endpoint) = present(Self::ENDPOINT_VAR) {
            config.endpoint = endpoint;
        }
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GmailSettings, OutlookSettings};
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn outlook() -> Provider {
        Provider::Outlook(OutlookSettings::new("cid", "contoso").unwrap())
    }

    #[test]
    fn test_builder_minimal() {
        let config = PipelineConfig::builder().provider(outlook()).build().unwrap();

        assert_eq!(config.folder, "INBOX");
        assert_eq!(config.limit, 50);
        assert_eq!(config.listener_port, 8080);
        assert_eq!(config.credential_path, PathBuf::from("msal_token.json"));
        assert!(!config.force_relogin);
        assert_eq!(config.timeouts.authorization, Duration::from_secs(300));
        assert_eq!(
            config.mail_endpoint(),
            MailEndpoint::new("outlook.office365.com", 993)
        );
    }

    #[test]
    fn test_builder_full() {
        let gmail = Provider::Gmail(GmailSettings::new("gid", "gsecret").unwrap());
        let config = PipelineConfig::builder()
            .provider(gmail)
            .folder("Archive")
            .limit(5)
            .credential_path("/tmp/gmail.json")
            .listener_port(9090)
            .force_relogin(true)
            .imap_host("imap.test.local")
            .imap_port(1993)
            .connect_timeout(Duration::from_secs(60))
            .authorization_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(config.folder, "Archive");
        assert_eq!(config.limit, 5);
        assert_eq!(config.credential_path, PathBuf::from("/tmp/gmail.json"));
        assert_eq!(config.listener_port, 9090);
        assert!(config.force_relogin);
        assert_eq!(config.mail_endpoint().address(), "imap.test.local:1993");
        assert_eq!(config.timeouts.connect, Duration::from_secs(60));
        assert_eq!(config.timeouts.authorization, Duration::from_secs(30));
        // Untouched timeouts keep their defaults
        assert_eq!(config.timeouts.logout, Duration::from_secs(5));
    }

    #[test]
    fn test_gmail_default_credential_path() {
        let gmail = Provider::Gmail(GmailSettings::new("gid", "gsecret").unwrap());
        let config = PipelineConfig::builder().provider(gmail).build().unwrap();
        assert_eq!(config.credential_path, PathBuf::from("token.json"));
        assert_eq!(config.mail_endpoint().address(), "imap.gmail.com:993");
    }

    #[test]
    fn test_builder_missing_provider() {
        let err = PipelineConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_builder_zero_limit() {
        let result = PipelineConfig::builder().provider(outlook()).limit(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_empty_folder() {
        let result = PipelineConfig::builder()
            .provider(outlook())
            .folder(" ")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_analysis_config_absent_without_credentials() {
        let env: HashMap<&str, &str> =
            HashMap::from([(AnalysisConfig::ENDPOINT_VAR, "http://localhost:1")]);
        let config = AnalysisConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string()));
        assert!(config.is_none());
    }

    #[test]
    fn test_analysis_config_prefers_api_key() {
        let env: HashMap<&str, &str> = HashMap::from([
            (AnalysisConfig::API_KEY_VAR, "key-1"),
            (AnalysisConfig::ACCESS_TOKEN_VAR, "token-1"),
        ]);
        let config =
            AnalysisConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();

        match &config.credential {
            AnalysisCredential::ApiKey(key) => assert_eq!(key.expose_secret(), "key-1"),
            other => panic!("expected API key, got {other:?}"),
        }
        assert_eq!(config.endpoint, DEFAULT_ANALYSIS_ENDPOINT);
        assert!(!format!("{config:?}").contains("key-1"));
    }

    #[test]
    fn test_analysis_config_access_token_and_endpoint() {
        let env: HashMap<&str, &str> = HashMap::from([
            (AnalysisConfig::API_KEY_VAR, ""),
            (AnalysisConfig::ACCESS_TOKEN_VAR, "token-1"),
            (AnalysisConfig::ENDPOINT_VAR, "http://127.0.0.1:8088/v1"),
        ]);
        let config =
            AnalysisConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();

        assert!(matches!(
            config.credential,
            AnalysisCredential::AccessToken(_)
        ));
        assert_eq!(config.endpoint, "http://127.0.0.1:8088/v1");
    }

    #[test]
    fn test_analysis_config_service_account_file() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let path = key.path().to_string_lossy().into_owned();
        let env: HashMap<&str, &str> =
            HashMap::from([(AnalysisConfig::SERVICE_ACCOUNT_VAR, path.as_str())]);

        let config =
            AnalysisConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        match &config.credential {
            AnalysisCredential::ServiceAccount(found) => assert_eq!(found, key.path()),
            other => panic!("expected service account, got {other:?}"),
        }

        // An API key still wins over a key file
        let env: HashMap<&str, &str> = HashMap::from([
            (AnalysisConfig::SERVICE_ACCOUNT_VAR, path.as_str()),
            (AnalysisConfig::API_KEY_VAR, "key-1"),
        ]);
        let config =
            AnalysisConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert!(matches!(config.credential, AnalysisCredential::ApiKey(_)));
    }

    #[test]
    fn test_missing_service_account_file_means_no_credentials() {
        assert!(AnalysisConfig::from_service_account_file("/nonexistent/credentials_nlp.json")
            .is_none());

        let env: HashMap<&str, &str> = HashMap::from([(
            AnalysisConfig::SERVICE_ACCOUNT_VAR,
            "/nonexistent/credentials_nlp.json",
        )]);
        assert!(AnalysisConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string())).is_none());
    }
}
