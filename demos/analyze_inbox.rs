//! Analyze the most recent messages of a mailbox and print the report as JSON.
//!
//! ```bash
//! # Outlook
//! export MAIL_INSIGHT_PROVIDER=outlook
//! export MAIL_INSIGHT_OUTLOOK_CLIENT_ID="00000000-0000-0000-0000-000000000000"
//! export MAIL_INSIGHT_OUTLOOK_TENANT="contoso.onmicrosoft.com"
//!
//! # or Gmail
//! export MAIL_INSIGHT_PROVIDER=gmail
//! export MAIL_INSIGHT_GMAIL_SECRETS="credentials.json"
//!
//! # Optional
//! export MAIL_INSIGHT_FOLDER="INBOX"
//! export MAIL_INSIGHT_LIMIT=20
//! export MAIL_INSIGHT_NLP_API_KEY="..."        # or MAIL_INSIGHT_NLP_CREDENTIALS=credentials_nlp.json
//! export RUST_LOG=mail_insight=debug
//!
//! cargo run --example analyze_inbox
//! ```

use mail_insight::provider::{GmailSettings, OutlookSettings, Provider};
use mail_insight::{AnalysisClient, AnalysisConfig, Pipeline, PipelineConfig};
use std::env;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mail_insight::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_insight=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .init();

    let provider = match env::var("MAIL_INSIGHT_PROVIDER").as_deref() {
        Ok("gmail") => {
            let secrets = env::var("MAIL_INSIGHT_GMAIL_SECRETS")
                .unwrap_or_else(|_| "credentials.json".to_string());
            Provider::Gmail(GmailSettings::from_client_secrets_file(secrets)?)
        }
        _ => Provider::Outlook(OutlookSettings::new(
            env::var("MAIL_INSIGHT_OUTLOOK_CLIENT_ID").expect("MAIL_INSIGHT_OUTLOOK_CLIENT_ID"),
            env::var("MAIL_INSIGHT_OUTLOOK_TENANT").unwrap_or_else(|_| "common".to_string()),
        )?),
    };

    let mut builder = PipelineConfig::builder().provider(provider);
    if let Ok(folder) = env::var("MAIL_INSIGHT_FOLDER") {
        builder = builder.folder(folder);
    }
    if let Some(limit) = env::var("MAIL_INSIGHT_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        builder = builder.limit(limit);
    }
    let config = builder.build()?;

    let analysis = AnalysisClient::from_config(AnalysisConfig::from_env());
    let mut pipeline = Pipeline::new(config, analysis)?;
    let report = pipeline.run().await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("report serializes")
    );
    eprintln!(
        "{} analyzed, {} skipped",
        report.entries.len(),
        report.skipped.len()
    );

    Ok(())
}
