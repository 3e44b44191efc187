//! Integration tests for mail-insight.
//!
//! Tests that talk to a real mailbox are disabled by default. To run them:
//!
//! ```bash
//! # Outlook
//! export MAIL_INSIGHT_TEST_OUTLOOK_CLIENT_ID="00000000-0000-0000-0000-000000000000"
//! export MAIL_INSIGHT_TEST_OUTLOOK_TENANT="contoso.onmicrosoft.com"
//!
//! # Gmail (path to the installed-app client secrets file)
//! export MAIL_INSIGHT_TEST_GMAIL_SECRETS="credentials.json"
//!
//! # Optional analysis service
//! export MAIL_INSIGHT_NLP_API_KEY="..."
//!
//! # Run with the integration-tests feature
//! cargo test --features integration-tests -- --ignored
//! ```
//!
//! The first run of each live test prints a consent URL and waits for the browser
//! redirect; later runs reuse the cached credential.

use mail_insight::provider::{GmailSettings, OutlookSettings, Provider};
use mail_insight::{
    AnalysisClient, AnalysisConfig, Error, ErrorCategory, MailSession, MailSource, Pipeline,
    PipelineConfig, PipelineState, TimeoutConfig,
};
use std::env;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Test Configuration Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn outlook_provider() -> Option<Provider> {
    dotenvy::dotenv().ok();
    let client_id = env::var("MAIL_INSIGHT_TEST_OUTLOOK_CLIENT_ID").ok()?;
    let tenant = env::var("MAIL_INSIGHT_TEST_OUTLOOK_TENANT").ok()?;
    OutlookSettings::new(client_id, tenant)
        .ok()
        .map(Provider::Outlook)
}

fn gmail_provider() -> Option<Provider> {
    dotenvy::dotenv().ok();
    let path = env::var("MAIL_INSIGHT_TEST_GMAIL_SECRETS").ok()?;
    GmailSettings::from_client_secrets_file(path)
        .ok()
        .map(Provider::Gmail)
}

fn live_config(provider: Provider, limit: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .provider(provider)
        .limit(limit)
        .authorization_timeout(Duration::from_secs(120))
        .build()
        .expect("valid config")
}

// ─────────────────────────────────────────────────────────────────────────────
// Live Pipeline Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires real Outlook account"]
async fn test_outlook_pipeline_run() {
    let provider = outlook_provider().expect("Outlook settings from environment variables");
    let analysis = AnalysisClient::from_config(AnalysisConfig::from_env());

    let mut pipeline = Pipeline::new(live_config(provider, 5), analysis).expect("pipeline");
    let report = pipeline.run().await.expect("pipeline run");

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert!(report.entries.len() + report.skipped.len() <= 5);
    for entry in &report.entries {
        println!("{} | {}", entry.message.date, entry.message.subject);
    }
}

#[tokio::test]
#[ignore = "requires real Gmail account"]
async fn test_gmail_pipeline_run() {
    let provider = gmail_provider().expect("Gmail settings from environment variables");

    // Analysis disabled: every entry must still be present with empty fields
    let mut pipeline =
        Pipeline::new(live_config(provider, 3), AnalysisClient::unavailable()).expect("pipeline");
    let report = pipeline.run().await.expect("pipeline run");

    assert!(report.entries.iter().all(|e| e.analysis.is_empty()));
}

#[tokio::test]
#[ignore = "requires intentionally expired token"]
async fn test_rejected_assertion_is_authentication_error() {
    let provider = outlook_provider().expect("Outlook settings from environment variables");
    let assertion =
        mail_insight::BearerAssertion::new("nobody@contoso.onmicrosoft.com", "expired-token");

    let err = MailSession::open(
        &assertion,
        &provider.mail_endpoint(),
        &TimeoutConfig::default(),
    )
    .await
    .unwrap_err();

    println!("Authentication error: {err}");
    assert_eq!(err.category(), ErrorCategory::Authentication);
}

#[tokio::test]
#[ignore = "requires real Outlook account"]
async fn test_session_enumerate_missing_folder_is_empty() {
    let provider = outlook_provider().expect("Outlook settings from environment variables");
    let config = live_config(provider, 5);
    let http = reqwest_client();
    let oauth = config.provider.oauth_client(http.clone()).expect("oauth");
    let store = mail_insight::CredentialStore::new(config.credential_path.clone(), oauth);
    let assertion = mail_insight::Authenticator::new(
        config.provider.clone(),
        store,
        http,
        config.listener_port,
        config.timeouts.authorization,
    )
    .authenticate()
    .await
    .expect("authenticate");

    let mut session = MailSession::open(&assertion, &config.mail_endpoint(), &config.timeouts)
        .await
        .expect("open session");

    let ids = session.enumerate("No Such Folder 8c1f", 5).await;
    assert!(ids.is_empty());

    session.close().await.expect("close");
    assert!(!session.is_open());
}

fn reqwest_client() -> reqwest::Client {
    reqwest::Client::new()
}

// ─────────────────────────────────────────────────────────────────────────────
// Offline Configuration Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_client_secrets_is_configuration_error() {
    let err = GmailSettings::from_client_secrets_file("/nonexistent/credentials.json").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_missing_outlook_identifiers() {
    assert!(matches!(
        OutlookSettings::new("", "contoso"),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        OutlookSettings::new("client-id", ""),
        Err(Error::InvalidConfig { .. })
    ));
}

#[tokio::test]
async fn test_missing_required_fields() {
    let result = PipelineConfig::builder().build();
    assert!(result.is_err());

    let provider = Provider::Outlook(OutlookSettings::new("cid", "contoso").unwrap());
    let result = PipelineConfig::builder().provider(provider).limit(0).build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unavailable_analysis_never_fails() {
    let client = AnalysisClient::unavailable();
    let result = client
        .analyze("The quarterly report exceeded expectations.")
        .await
        .expect("unavailable analysis does not fail");

    assert_eq!(result.sentiment_score, None);
    assert!(result.entities.is_empty());
    assert!(result.categories.is_empty());
}
