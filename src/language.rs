//! HTTP client for a REST natural-language API.
//!
//! Speaks the `documents:analyzeSentiment`, `documents:analyzeEntities`, and
//! `documents:classifyText` methods of the Cloud Natural Language v1 API, sending
//! plain-text documents with UTF-8 offsets.
//!
//! Requests are authorized with an API key, a fixed bearer token, or tokens minted
//! from a service account key.

use crate::analysis::{Category, Entity, LanguageService, Sentiment};
use crate::config::{AnalysisConfig, AnalysisCredential};
use crate::error::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

const CLOUD_LANGUAGE_SCOPE: &str = "https://www.googleapis.com/auth/cloud-language";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRequest<'a> {
    document: Document<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_type: Option<&'static str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentimentResponse {
    document_sentiment: Option<SentimentBody>,
}

#[derive(Deserialize)]
struct SentimentBody {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    magnitude: f32,
}

/// Access tokens minted from a service account key, cached until near expiry.
struct ServiceAccountTokens {
    key: ServiceAccountKey,
    authenticator: OnceCell<DefaultAuthenticator>,
}

impl ServiceAccountTokens {
    fn load(path: &Path) -> Result<Self> {
        let key_err = |source| Error::AnalysisKey {
            path: path.to_path_buf(),
            source,
        };
        let raw = std::fs::read(path).map_err(key_err)?;
        let key = yup_oauth2::parse_service_account_key(raw).map_err(key_err)?;

        debug!(client_email = %key.client_email, "Loaded analysis service account");
        Ok(Self {
            key,
            authenticator: OnceCell::new(),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let token_err = |message: String| Error::AnalysisToken { message };

        let authenticator = self
            .authenticator
            .get_or_try_init(|| ServiceAccountAuthenticator::builder(self.key.clone()).build())
            .await
            .map_err(|e| token_err(e.to_string()))?;

        let token = authenticator
            .token(&[CLOUD_LANGUAGE_SCOPE])
            .await
            .map_err(|e| token_err(e.to_string()))?;

        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| token_err("token response carried no access token".into()))
    }
}

#[derive(Clone)]
enum Authorization {
    ApiKey(SecretString),
    Bearer(SecretString),
    ServiceAccount(Arc<ServiceAccountTokens>),
}

impl Authorization {
    fn kind(&self) -> &'static str {
        match self {
            Authorization::ApiKey(_) => "api_key",
            Authorization::Bearer(_) => "access_token",
            Authorization::ServiceAccount(_) => "service_account",
        }
    }
}

#[derive(Deserialize)]
struct EntitiesResponse {
    #[serde(default)]
    entities: Vec<EntityBody>,
}

#[derive(Deserialize)]
struct EntityBody {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    salience: f32,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    categories: Vec<CategoryBody>,
}

#[derive(Deserialize)]
struct CategoryBody {
    name: String,
    #[serde(default)]
    confidence: f32,
}

/// [`LanguageService`] backed by the natural-language REST API.
#[derive(Clone)]
pub struct HttpLanguageService {
    http: reqwest::Client,
    endpoint: String,
    authorization: Authorization,
}

impl HttpLanguageService {
    /// Creates a service client from `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::HttpClient`] if the HTTP client cannot be built
    /// - [`Error::AnalysisKey`] if a service account key cannot be read or parsed
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| Error::HttpClient { source })?;

        let authorization = match config.credential {
            AnalysisCredential::ApiKey(key) => Authorization::ApiKey(key),
            AnalysisCredential::AccessToken(token) => Authorization::Bearer(token),
            AnalysisCredential::ServiceAccount(path) => {
                Authorization::ServiceAccount(Arc::new(ServiceAccountTokens::load(&path)?))
            }
        };

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            authorization,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        text: &str,
        with_encoding: bool,
    ) -> Result<T> {
        let url = format!("{}/documents:{operation}", self.endpoint);
        let body = DocumentRequest {
            document: Document {
                kind: "PLAIN_TEXT",
                content: text,
            },
            encoding_type: with_encoding.then_some("UTF8"),
        };

        let request = self.http.post(&url).json(&body);
        let request = match &self.authorization {
            Authorization::ApiKey(key) => request.query(&[("key", key.expose_secret())]),
            Authorization::Bearer(token) => request.bearer_auth(token.expose_secret()),
            Authorization::ServiceAccount(tokens) => {
                request.bearer_auth(tokens.access_token().await?)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|source| Error::AnalysisRequest { operation, source })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::AnalysisStatus {
                operation,
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|source| Error::AnalysisRequest { operation, source })
    }
}

#[async_trait]
impl LanguageService for HttpLanguageService {
    #[instrument(name = "language::sentiment", skip_all)]
    async fn sentiment(&self, text: &str) -> Result<Sentiment> {
        let response: SentimentResponse = self.call("analyzeSentiment", text, true).await?;
        let body = response
            .document_sentiment
            .ok_or(Error::AnalysisIncomplete {
                operation: "analyzeSentiment",
                missing: "documentSentiment",
            })?;
        debug!(score = body.score, magnitude = body.magnitude, "Sentiment scored");
        Ok(Sentiment {
            score: body.score,
            magnitude: body.magnitude,
        })
    }

    #[instrument(name = "language::entities", skip_all)]
    async fn entities(&self, text: &str) -> Result<Vec<Entity>> {
        let response: EntitiesResponse = self.call("analyzeEntities", text, true).await?;
        Ok(response
            .entities
            .into_iter()
            .map(|e| Entity {
                name: e.name,
                entity_type: e.kind,
                salience: e.salience,
            })
            .collect())
    }

    #[instrument(name = "language::categories", skip_all)]
    async fn categories(&self, text: &str) -> Result<Vec<Category>> {
        let response: ClassifyResponse = self.call("classifyText", text, false).await?;
        Ok(response
            .categories
            .into_iter()
            .map(|c| Category {
                name: c.name,
                confidence: c.confidence,
            })
            .collect())
    }
}

impl std::fmt::Debug for HttpLanguageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLanguageService")
            .field("endpoint", &self.endpoint)
            .field("authorization", &self.authorization.kind())
            .finish_non_exhaustive()
    }
}
