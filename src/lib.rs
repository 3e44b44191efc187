//! # mail-insight
//!
//! OAuth2 mailbox retrieval over IMAP with best-effort text analysis of each message.
//!
//! This crate provides a high-level, async API for:
//! - Authorizing against Gmail or Outlook with the OAuth2 authorization-code flow,
//!   caching and silently refreshing the resulting credential
//! - Opening an IMAP session authenticated with SASL `XOAUTH2`
//! - Decoding messages into plain-text records and cleaning their bodies
//! - Scoring sentiment, extracting entities, and classifying content, degrading
//!   gracefully when the analysis service is missing or failing
//!
//! ## Quick Start
//!
//! ```no_run
//! use mail_insight::{AnalysisClient, AnalysisConfig, Pipeline, PipelineConfig};
//! use mail_insight::provider::{OutlookSettings, Provider};
//!
//! # async fn example() -> mail_insight::Result<()> {
//! let provider = Provider::Outlook(OutlookSettings::new("client-id", "contoso.onmicrosoft.com")?);
//! let config = PipelineConfig::builder()
//!     .provider(provider)
//!     .limit(25)
//!     .build()?;
//!
//! // Analysis is optional; without credentials every result is simply empty
//! let analysis = AnalysisClient::from_config(AnalysisConfig::from_env());
//!
//! let mut pipeline = Pipeline::new(config, analysis)?;
//! let report = pipeline.run().await?;
//!
//! for entry in &report.entries {
//!     println!("{}: {:?}", entry.message.subject, entry.analysis.sentiment_score);
//! }
//! for skipped in &report.skipped {
//!     println!("skipped {} at {:?}: {}", skipped.identifier, skipped.stage, skipped.reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Building Blocks
//!
//! The pipeline stages are usable on their own:
//!
//! ```
//! use mail_insight::mailbox::RawMessage;
//! use mail_insight::normalize::normalize;
//! use mail_insight::sanitize::sanitize;
//!
//! let raw = RawMessage {
//!     identifier: "42".into(),
//!     envelope: b"Subject: Hi\r\n\r\n<p>Hello</p>there".to_vec(),
//! };
//! let message = normalize(&raw);
//! assert_eq!(sanitize(&message.body), "Hello there");
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::category`]
//! to tell configuration, authentication, and connection problems apart, and
//! [`Error::is_retryable`] to decide whether re-running may help:
//!
//! ```
//! use mail_insight::{Error, ErrorCategory};
//!
//! fn handle_error(error: &Error) {
//!     match error.category() {
//!         ErrorCategory::Authentication => println!("Re-authorize (force_relogin): {error}"),
//!         _ if error.is_retryable() => println!("Transient error, can retry: {error}"),
//!         _ => println!("Permanent error: {error}"),
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Spans are named `module::operation`
//! and carry structured fields; secrets never appear in them.
//!
//! ### Span Naming Convention
//!
//! - `pipeline::run` / `pipeline::process` - One batch
//! - `auth::authenticate` - Credential lookup or interactive consent
//! - `credential::load` / `credential::save` - Token cache
//! - `oauth::exchange_code` / `oauth::refresh` - Token endpoint calls
//! - `MailSession::open`, `MailSession::enumerate`, `MailSession::fetch` - IMAP
//! - `analysis::analyze` - Text analysis
//!
//! ### Standard Fields
//!
//! - `provider` - `gmail` or `outlook`
//! - `account` - Mailbox address
//! - `imap_host` - IMAP server hostname
//! - `folder` - Mailbox folder
//! - `identifier` - Message UID
//! - `outcome` - Which degraded path was taken (`refresh_failed`, `fetch_failed`,
//!   `sentiment_failed`, `classification_failed`, `analysis_unavailable`, ...)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod analysis;
pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod language;
pub mod listener;
pub mod mailbox;
pub mod normalize;
pub mod oauth;
pub mod pipeline;
pub mod provider;
pub mod sanitize;

// Internal modules
mod connection;
mod session;

// Re-exports for ergonomic API
pub use analysis::{AnalysisClient, AnalysisResult, LanguageService};
pub use auth::{Authenticator, BearerAssertion, ConsentPrompt};
pub use config::{
    AnalysisConfig, AnalysisCredential, PipelineConfig, PipelineConfigBuilder, TimeoutConfig,
};
pub use credential::{Credential, CredentialStore};
pub use error::{Error, ErrorCategory, Result};
pub use mailbox::{MailSession, MailSource, RawMessage};
pub use normalize::NormalizedMessage;
pub use pipeline::{Pipeline, PipelineState, Report, ReportEntry, SkippedMessage, Stage};
pub use provider::Provider;
