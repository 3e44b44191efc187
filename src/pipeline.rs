//! End-to-end run: authenticate, read, normalize, sanitize, analyze, report.
//!
//! # Example
//!
//! ```no_run
//! use mail_insight::{AnalysisClient, AnalysisConfig, Pipeline, PipelineConfig};
//! use mail_insight::provider::{GmailSettings, Provider};
//!
//! # async fn example() -> mail_insight::Result<()> {
//! let provider = Provider::Gmail(GmailSettings::from_client_secrets_file("credentials.json")?);
//! let config = PipelineConfig::builder().provider(provider).limit(10).build()?;
//! let analysis = AnalysisClient::from_config(AnalysisConfig::from_env());
//!
//! let mut pipeline = Pipeline::new(config, analysis)?;
//! let report = pipeline.run().await?;
//! for entry in &report.entries {
//!     println!("{} {:?}", entry.message.subject, entry.analysis.sentiment_score);
//! }
//! # Ok(())
//! # }
//! ```

use crate::analysis::{AnalysisClient, AnalysisResult};
use crate::auth::{Authenticator, ConsentPrompt};
use crate::config::PipelineConfig;
use crate::credential::CredentialStore;
use crate::error::{Error, Result};
use crate::mailbox::{MailSession, MailSource};
use crate::normalize::{normalize, NormalizedMessage};
use crate::sanitize::sanitize;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// Not started.
    Idle,
    /// Obtaining a bearer assertion.
    Authenticating,
    /// Mail session established, enumerating messages.
    SessionOpen,
    /// Retrieving a message.
    Fetching,
    /// Normalizing, sanitizing, and analyzing a message.
    Analyzing,
    /// Finished; the session has been closed.
    Done,
    /// Aborted by a configuration, authentication, or connection error.
    Failed,
}

/// One analyzed message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    /// The decoded message.
    pub message: NormalizedMessage,
    /// Analysis of its sanitized body.
    pub analysis: AnalysisResult,
}

/// Processing step at which a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// The message could not be retrieved.
    Fetch,
    /// Entity extraction failed for the message.
    Analyze,
}

/// A message left out of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMessage {
    /// Server-assigned identifier.
    pub identifier: String,
    /// Step that failed.
    pub stage: Stage,
    /// Human-readable cause.
    pub reason: String,
}

/// Result of one run.
///
/// `entries` keep enumeration order. An identifier appears in either `entries` or
/// `skipped`, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    /// Analyzed messages in enumeration order.
    pub entries: Vec<ReportEntry>,
    /// Messages dropped along the way.
    pub skipped: Vec<SkippedMessage>,
}

/// Orchestrates one batch over a mailbox.
pub struct Pipeline {
    config: PipelineConfig,
    authenticator: Authenticator,
    analysis: AnalysisClient,
    state: PipelineState,
}

impl Pipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider's endpoints are invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: PipelineConfig, analysis: AnalysisClient) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeouts.http)
            .build()
            .map_err(|source| Error::HttpClient { source })?;

        let oauth = config.provider.oauth_client(http.clone())?;
        let store = CredentialStore::new(config.credential_path.clone(), oauth);
        let authenticator = Authenticator::new(
            config.provider.clone(),
            store,
            http,
            config.listener_port,
            config.timeouts.authorization,
        )
        .force_relogin(config.force_relogin);

        Ok(Self {
            config,
            authenticator,
            analysis,
            state: PipelineState::Idle,
        })
    }

    /// Replaces how the consent URL is shown to the user.
    #[must_use]
    pub fn with_consent_prompt(mut self, prompt: Arc<dyn ConsentPrompt>) -> Self {
        self.authenticator = self.authenticator.with_consent_prompt(prompt);
        self
    }

    /// Current state of the most recent run.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Authenticates, opens a mail session, and processes the configured folder.
    ///
    /// # Errors
    ///
    /// Returns configuration, authentication, storage, and connection errors. Failures
    /// of individual messages are recorded in [`Report::skipped`] instead.
    #[instrument(
        name = "pipeline::run",
        skip_all,
        fields(provider = self.config.provider.name(), folder = %self.config.folder)
    )]
    pub async fn run(&mut self) -> Result<Report> {
        self.state = PipelineState::Authenticating;
        let assertion = match self.authenticator.authenticate().await {
            Ok(assertion) => assertion,
            Err(e) => return Err(self.fail(e)),
        };

        let endpoint = self.config.mail_endpoint();
        let session = match MailSession::open(&assertion, &endpoint, &self.config.timeouts).await
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e)),
        };

        info!(account = %assertion.account(), imap_host = %endpoint.host, "Mail session opened");

        self.run_with_source(session).await
    }

    /// Processes the configured folder from an already opened source.
    ///
    /// The source is closed exactly once before returning.
    #[instrument(name = "pipeline::process", skip_all, fields(folder = %self.config.folder))]
    pub async fn run_with_source<S: MailSource>(&mut self, mut source: S) -> Result<Report> {
        self.state = PipelineState::SessionOpen;
        let ids = source.enumerate(&self.config.folder, self.config.limit).await;
        debug!(count = ids.len(), "Messages to process");

        let mut report = Report::default();

        for id in ids {
            self.state = PipelineState::Fetching;
            let Some(raw) = source.fetch(&id).await else {
                report.skipped.push(SkippedMessage {
                    identifier: id,
                    stage: Stage::Fetch,
                    reason: "message could not be retrieved".into(),
                });
                continue;
            };

            self.state = PipelineState::Analyzing;
            let message = normalize(&raw);
            let text = sanitize(&message.body);

            match self.analysis.analyze(&text).await {
                Ok(analysis) => report.entries.push(ReportEntry { message, analysis }),
                Err(e) => {
                    warn!(identifier = %id, error = %e, "Skipping message after analysis failure");
                    report.skipped.push(SkippedMessage {
                        identifier: id,
                        stage: Stage::Analyze,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = source.close().await {
            warn!(error = %e, "Mail session did not close cleanly");
        }
        self.state = PipelineState::Done;

        info!(
            analyzed = report.entries.len(),
            skipped = report.skipped.len(),
            "Pipeline run complete"
        );

        Ok(report)
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!(
            error = %error,
            category = %error.category(),
            state = ?self.state,
            "Pipeline run failed"
        );
        self.state = PipelineState::Failed;
        error
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("provider", &self.config.provider.name())
            .field("folder", &self.config.folder)
            .field("limit", &self.config.limit)
            .field("analysis", &self.analysis)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
