//! Error types for the mail-insight crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Every variant maps to an [`ErrorCategory`]; see [`Error::category`] and
//! [`Error::is_retryable`].
//!
//! Only configuration, authentication, storage, and connection problems ever reach the
//! caller of [`Pipeline::run`](crate::Pipeline::run). Per-message fetch and analysis
//! failures are contained by the pipeline and show up in the
//! [`Report`](crate::Report) instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while authenticating, reading mail, or analyzing text.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Client secrets file could not be read.
    #[error("failed to read client secrets from {}", path.display())]
    ClientSecretsRead {
        /// Path of the client secrets file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Client secrets file is not valid JSON of the expected shape.
    #[error("malformed client secrets in {}", path.display())]
    ClientSecretsFormat {
        /// Path of the client secrets file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An endpoint URL could not be parsed.
    #[error("invalid URL '{url}'")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    /// HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    HttpClient {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Authentication errors (NOT retryable - re-run the authorization step)
    // ─────────────────────────────────────────────────────────────────────────
    /// Token endpoint rejected the request.
    #[error("{grant} grant rejected by token endpoint (status {status}): {message}")]
    TokenRejected {
        /// Grant type that was attempted (`authorization_code` or `refresh_token`).
        grant: &'static str,
        /// HTTP status code.
        status: u16,
        /// Error body returned by the endpoint.
        message: String,
    },

    /// Token endpoint could not be reached or returned an unreadable body.
    #[error("{grant} request to token endpoint failed")]
    TokenRequest {
        /// Grant type that was attempted.
        grant: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The authorization redirect carried no code (consent denied or malformed request).
    #[error("authorization redirect carried no code")]
    AuthorizationDenied,

    /// No authorization code arrived before the deadline.
    #[error("no authorization code received after {timeout:?}")]
    AuthorizationTimeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Account identifier could not be determined from the provider.
    #[error("failed to resolve account identifier: {message}")]
    AccountLookup {
        /// Description of what went wrong.
        message: String,
    },

    /// Mail server rejected the XOAUTH2 bearer assertion.
    #[error("mail server rejected XOAUTH2 authentication for {account}")]
    AuthenticationRejected {
        /// The account used for authentication.
        account: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Credential storage errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Credential file could not be read.
    #[error("failed to read credential file {}", path.display())]
    CredentialRead {
        /// Path of the credential file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Credential file could not be written.
    #[error("failed to write credential file {}", path.display())]
    CredentialWrite {
        /// Path of the credential file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Credential file content is not a valid credential record.
    #[error("malformed credential record in {}", path.display())]
    CredentialFormat {
        /// Path of the credential file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to bind the local authorization listener.
    #[error("failed to bind authorization listener on {addr}")]
    ListenerBind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Server closed the connection or sent garbage instead of the IMAP greeting.
    #[error("no IMAP greeting from server: {message}")]
    ImapGreeting {
        /// What was received instead.
        message: String,
    },

    /// HTTP request to a provider API failed.
    #[error("request to {endpoint} failed")]
    HttpRequest {
        /// The endpoint being called.
        endpoint: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {account} after {timeout:?}")]
    AuthTimeout {
        /// The account used for authentication.
        account: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Search timeout.
    #[error("search timeout in '{mailbox}' after {timeout:?}")]
    SearchTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for {identifier} after {timeout:?}")]
    FetchTimeout {
        /// The message identifier being fetched.
        identifier: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed in '{mailbox}'")]
    ImapSearch {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for {identifier}")]
    ImapFetch {
        /// The identifier that failed.
        identifier: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Fetch succeeded but returned no message body.
    #[error("no message body returned for {identifier}")]
    EmptyFetch {
        /// The identifier that was fetched.
        identifier: String,
    },

    /// Message identifier is not an IMAP UID.
    #[error("invalid message identifier {identifier:?}")]
    InvalidIdentifier {
        /// The identifier as given.
        identifier: String,
    },

    /// Operation attempted on a session that was already closed.
    #[error("mail session is already closed")]
    SessionClosed,

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Analysis service errors (contained per message, never fatal to a batch)
    // ─────────────────────────────────────────────────────────────────────────
    /// Analysis service could not be reached or returned an unreadable body.
    #[error("analysis request '{operation}' failed")]
    AnalysisRequest {
        /// The analysis operation (e.g. `analyzeSentiment`).
        operation: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Analysis service answered with a non-success status.
    #[error("analysis request '{operation}' returned status {status}: {message}")]
    AnalysisStatus {
        /// The analysis operation.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Error body returned by the service.
        message: String,
    },

    /// Analysis service answered successfully but without the expected result.
    #[error("analysis request '{operation}' returned no {missing}")]
    AnalysisIncomplete {
        /// The analysis operation.
        operation: &'static str,
        /// The field the response lacked.
        missing: &'static str,
    },

    /// Service account key for the analysis service is unreadable.
    #[error("invalid analysis service account key {}", path.display())]
    AnalysisKey {
        /// Key file path.
        path: PathBuf,
        /// The underlying I/O or parse error.
        #[source]
        source: std::io::Error,
    },

    /// No access token could be minted for the analysis service.
    #[error("could not obtain analysis access token: {message}")]
    AnalysisToken {
        /// Description from the token source.
        message: String,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed
    /// when the pipeline is run again.
    ///
    /// Authentication errors are deliberately not retryable: recovery requires a new
    /// authorization, not a repeat of the same request.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ListenerBind { .. }
            | Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ImapGreeting { .. }
            | Error::HttpRequest { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::AnalysisRequest { .. }
            | Error::AnalysisToken { .. } => true,

            Error::InvalidConfig { .. }
            | Error::ClientSecretsRead { .. }
            | Error::ClientSecretsFormat { .. }
            | Error::InvalidUrl { .. }
            | Error::InvalidDnsName { .. }
            | Error::HttpClient { .. }
            | Error::AnalysisKey { .. }
            | Error::TokenRejected { .. }
            | Error::TokenRequest { .. }
            | Error::AuthorizationDenied
            | Error::AuthorizationTimeout { .. }
            | Error::AccountLookup { .. }
            | Error::AuthenticationRejected { .. }
            | Error::CredentialRead { .. }
            | Error::CredentialWrite { .. }
            | Error::CredentialFormat { .. }
            | Error::LogoutTimeout { .. }
            | Error::EmptyFetch { .. }
            | Error::InvalidIdentifier { .. }
            | Error::SessionClosed
            | Error::ImapLogout { .. }
            | Error::AnalysisStatus { .. }
            | Error::AnalysisIncomplete { .. } => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::ClientSecretsRead { .. }
            | Error::ClientSecretsFormat { .. }
            | Error::InvalidUrl { .. }
            | Error::InvalidDnsName { .. }
            | Error::HttpClient { .. }
            | Error::AnalysisKey { .. } => ErrorCategory::Configuration,

            Error::TokenRejected { .. }
            | Error::TokenRequest { .. }
            | Error::AuthorizationDenied
            | Error::AuthorizationTimeout { .. }
            | Error::AccountLookup { .. }
            | Error::AuthenticationRejected { .. } => ErrorCategory::Authentication,

            Error::CredentialRead { .. }
            | Error::CredentialWrite { .. }
            | Error::CredentialFormat { .. } => ErrorCategory::Storage,

            Error::ListenerBind { .. }
            | Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ImapGreeting { .. }
            | Error::HttpRequest { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::EmptyFetch { .. }
            | Error::InvalidIdentifier { .. }
            | Error::SessionClosed
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::AnalysisRequest { .. }
            | Error::AnalysisStatus { .. }
            | Error::AnalysisIncomplete { .. }
            | Error::AnalysisToken { .. } => ErrorCategory::Analysis,
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or invalid client configuration.
    Configuration,
    /// Authorization failed or the mail server rejected the bearer assertion.
    Authentication,
    /// Credential file could not be read or written.
    Storage,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Text analysis service errors.
    Analysis,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Analysis => write!(f, "analysis"),
        }
    }
}
