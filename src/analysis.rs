//! Best-effort text analysis with graceful degradation.
//!
//! [`AnalysisClient::analyze`] applies these rules:
//!
//! | Situation                         | Result                                 |
//! |-----------------------------------|----------------------------------------|
//! | no service configured             | all-empty result                       |
//! | sentiment fails                   | all-empty result                       |
//! | entity extraction fails           | `Err`, the message is skipped          |
//! | classification fails              | categories empty, everything else kept |
//!
//! Every degraded path emits a `warn!` event with an `outcome` field.

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::language::HttpLanguageService;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Document-level sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sentiment {
    /// Polarity from -1.0 (negative) to 1.0 (positive).
    pub score: f32,
    /// Overall emotional strength, unbounded and non-negative.
    pub magnitude: f32,
}

/// A named entity found in the text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    /// Entity text as it appears.
    pub name: String,
    /// Entity kind, e.g. `PERSON` or `ORGANIZATION`.
    pub entity_type: String,
    /// Relevance within the document, 0.0 to 1.0.
    pub salience: f32,
}

/// A content category assigned to the text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    /// Category path, e.g. `/Business & Industrial`.
    pub name: String,
    /// Classifier confidence, 0.0 to 1.0.
    pub confidence: f32,
}

/// Analysis output for one message. Empty fields mean "not available", not failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Sentiment score, if sentiment analysis ran.
    pub sentiment_score: Option<f32>,
    /// Sentiment magnitude, if sentiment analysis ran.
    pub sentiment_magnitude: Option<f32>,
    /// Entities in service order.
    pub entities: Vec<Entity>,
    /// Categories in service order.
    pub categories: Vec<Category>,
}

impl AnalysisResult {
    /// Returns `true` if no field carries data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sentiment_score.is_none()
            && self.sentiment_magnitude.is_none()
            && self.entities.is_empty()
            && self.categories.is_empty()
    }
}

/// A natural-language analysis backend.
#[async_trait]
pub trait LanguageService: Send + Sync {
    /// Scores document sentiment.
    async fn sentiment(&self, text: &str) -> Result<Sentiment>;

    /// Extracts named entities.
    async fn entities(&self, text: &str) -> Result<Vec<Entity>>;

    /// Classifies the document into content categories.
    async fn categories(&self, text: &str) -> Result<Vec<Category>>;
}

/// Front end to an optional [`LanguageService`].
#[derive(Clone)]
pub struct AnalysisClient {
    service: Option<Arc<dyn LanguageService>>,
}

impl AnalysisClient {
    /// A client with no backend. Every analysis yields the empty result.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { service: None }
    }

    /// A client backed by `service`.
    #[must_use]
    pub fn new(service: Arc<dyn LanguageService>) -> Self {
        Self {
            service: Some(service),
        }
    }

    /// Builds a client from optional HTTP service settings.
    ///
    /// Missing settings and a backend that cannot be constructed (for example an
    /// unparseable service account key) both yield an unavailable client. They are
    /// logged differently: the first is a normal deployment choice, the second a
    /// fault.
    #[must_use]
    pub fn from_config(config: Option<AnalysisConfig>) -> Self {
        let Some(config) = config else {
            info!(
                outcome = "analysis_unavailable",
                reason = "no_credentials",
                "No analysis credentials configured, analysis disabled"
            );
            return Self::unavailable();
        };

        match HttpLanguageService::new(config) {
            Ok(service) => Self::new(Arc::new(service)),
            Err(e) => {
                warn!(
                    error = %e,
                    outcome = "analysis_unavailable",
                    reason = "construction_failed",
                    "Analysis service could not be constructed, analysis disabled"
                );
                Self::unavailable()
            }
        }
    }

    /// Returns `true` if a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.service.is_some()
    }

    /// Analyzes sanitized text.
    ///
    /// # Errors
    ///
    /// Returns the service error if entity extraction fails. All other failures
    /// degrade the result instead.
    #[instrument(name = "analysis::analyze", skip_all, fields(text_len = text.len()))]
    pub async fn analyze(&self, text: &str) -> Result<AnalysisResult> {
        let Some(service) = &self.service else {
            return Ok(AnalysisResult::default());
        };

        if text.is_empty() {
            debug!("Nothing to analyze");
            return Ok(AnalysisResult::default());
        }

        let sentiment = match service.sentiment(text).await {
            Ok(sentiment) => sentiment,
            Err(e) => {
                warn!(
                    error = %e,
                    outcome = "sentiment_failed",
                    "Sentiment analysis failed, returning empty analysis"
                );
                return Ok(AnalysisResult::default());
            }
        };

        let entities = service.entities(text).await.map_err(|e| {
            warn!(error = %e, outcome = "entities_failed", "Entity extraction failed");
            e
        })?;

        let categories = match service.categories(text).await {
            Ok(categories) => categories,
            Err(e) => {
                warn!(
                    error = %e,
                    category = %e.category(),
                    outcome = "classification_failed",
                    "Classification failed, continuing without categories"
                );
                Vec::new()
            }
        };

        debug!(
            score = sentiment.score,
            entity_count = entities.len(),
            category_count = categories.len(),
            "Analysis complete"
        );

        Ok(AnalysisResult {
            sentiment_score: Some(sentiment.score),
            sentiment_magnitude: Some(sentiment.magnitude),
            entities,
            categories,
        })
    }
}

impl std::fmt::Debug for AnalysisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisClient")
            .field("available", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use mockall::mock;

    mock! {
        pub Language {}

        #[async_trait]
        impl LanguageService for Language {
            async fn sentiment(&self, text: &str) -> Result<Sentiment>;
            async fn entities(&self, text: &str) -> Result<Vec<Entity>>;
            async fn categories(&self, text: &str) -> Result<Vec<Category>>;
        }
    }

    fn service_error(operation: &'static str) -> Error {
        Error::AnalysisStatus {
            operation,
            status: 503,
            message: "unavailable".into(),
        }
    }

    fn entity() -> Entity {
        Entity {
            name: "Contoso".into(),
            entity_type: "ORGANIZATION".into(),
            salience: 0.8,
        }
    }

    #[tokio::test]
    async fn test_unavailable_returns_empty_result() {
        let client = AnalysisClient::unavailable();
        assert!(!client.is_available());

        let result = client.analyze("quarterly numbers look great").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.sentiment_score, None);
    }

    #[tokio::test]
    async fn test_from_config_without_credentials_is_unavailable() {
        let client = AnalysisClient::from_config(None);
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_from_config_with_broken_key_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials_nlp.json");
        std::fs::write(&path, b"not a service account key").unwrap();

        let client = AnalysisClient::from_config(AnalysisConfig::from_service_account_file(&path));
        assert!(!client.is_available());

        let result = client.analyze("still analyzable text").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_full_analysis() {
        let mut mock = MockLanguage::new();
        mock.expect_sentiment().times(1).returning(|_| {
            Ok(Sentiment {
                score: 0.6,
                magnitude: 1.2,
            })
        });
        mock.expect_entities()
            .times(1)
            .returning(|_| Ok(vec![entity()]));
        mock.expect_categories().times(1).returning(|_| {
            Ok(vec![Category {
                name: "/Business & Industrial".into(),
                confidence: 0.9,
            }])
        });

        let result = AnalysisClient::new(Arc::new(mock))
            .analyze("Contoso reported record revenue")
            .await
            .unwrap();

        assert_eq!(result.sentiment_score, Some(0.6));
        assert_eq!(result.sentiment_magnitude, Some(1.2));
        assert_eq!(result.entities, vec![entity()]);
        assert_eq!(result.categories.len(), 1);
    }

    #[tokio::test]
    async fn test_sentiment_failure_stops_early() {
        let mut mock = MockLanguage::new();
        mock.expect_sentiment()
            .times(1)
            .returning(|_| Err(service_error("analyzeSentiment")));
        mock.expect_entities().times(0);
        mock.expect_categories().times(0);

        let result = AnalysisClient::new(Arc::new(mock))
            .analyze("some text")
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_entity_failure_propagates() {
        let mut mock = MockLanguage::new();
        mock.expect_sentiment().returning(|_| {
            Ok(Sentiment {
                score: 0.0,
                magnitude: 0.0,
            })
        });
        mock.expect_entities()
            .returning(|_| Err(service_error("analyzeEntities")));
        mock.expect_categories().times(0);

        let err = AnalysisClient::new(Arc::new(mock))
            .analyze("some text")
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Analysis);
    }

    #[tokio::test]
    async fn test_classification_failure_keeps_sentiment_and_entities() {
        let mut mock = MockLanguage::new();
        mock.expect_sentiment().returning(|_| {
            Ok(Sentiment {
                score: -0.4,
                magnitude: 0.9,
            })
        });
        mock.expect_entities().returning(|_| Ok(vec![entity()]));
        mock.expect_categories()
            .returning(|_| Err(service_error("classifyText")));

        let result = AnalysisClient::new(Arc::new(mock))
            .analyze("short")
            .await
            .unwrap();

        assert_eq!(result.sentiment_score, Some(-0.4));
        assert_eq!(result.entities.len(), 1);
        assert!(result.categories.is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_skips_service() {
        let mut mock = MockLanguage::new();
        mock.expect_sentiment().times(0);

        let result = AnalysisClient::new(Arc::new(mock)).analyze("").await.unwrap();
        assert!(result.is_empty());
    }
}
