use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::provider::{Entity, SentimentScores, TextProvider, TextService, TextSignals};

/// Azure-style text-analytics client (v3.1 document API shape).
///
/// Each requested service is its own call; the results are merged into one
/// `TextSignals`. A failure in any service fails the whole analysis — the
/// gateway's retry/breaker layer decides what to do with it.
pub struct TextAnalyticsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl TextAnalyticsClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn service_path(service: TextService) -> &'static str {
        match service {
            TextService::Sentiment => "/text/analytics/v3.1/sentiment",
            TextService::Entities => "/text/analytics/v3.1/entities/recognition/general",
            TextService::KeyPhrases => "/text/analytics/v3.1/keyPhrases",
            TextService::Pii => "/text/analytics/v3.1/entities/recognition/pii",
        }
    }

    async fn call(&self, service: TextService, text: &str) -> Result<DocumentResult> {
        let url = format!("{}{}", self.endpoint, Self::service_path(service));
        let body = serde_json::json!({
            "documents": [{ "id": "1", "language": "en", "text": text }],
        });

        debug!(service = ?service, "text analytics request");

        let resp = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(GatewayError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "text analytics API error");
            return Err(GatewayError::Api {
                status,
                message: text,
            });
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        parsed
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Parse("no documents in response".to_string()))
    }
}

#[async_trait]
impl TextProvider for TextAnalyticsClient {
    fn name(&self) -> &str {
        "text-analytics"
    }

    async fn analyze(&self, text: &str, services: &[TextService]) -> Result<TextSignals> {
        let mut signals = TextSignals::default();

        for service in services {
            let doc = self.call(*service, text).await?;
            match service {
                TextService::Sentiment => {
                    if let Some(s) = doc.confidence_scores {
                        signals.sentiment = SentimentScores {
                            positive: s.positive,
                            neutral: s.neutral,
                            negative: s.negative,
                        };
                    }
                }
                TextService::Entities => {
                    signals.entities = doc.entities.into_iter().map(Entity::from).collect();
                }
                TextService::KeyPhrases => {
                    signals.key_phrases = doc.key_phrases;
                }
                TextService::Pii => {
                    signals.pii = doc.entities.into_iter().map(Entity::from).collect();
                }
            }
        }

        Ok(signals)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    documents: Vec<DocumentResult>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DocumentResult {
    #[serde(default)]
    confidence_scores: Option<ConfidenceScores>,
    #[serde(default)]
    entities: Vec<ApiEntity>,
    #[serde(default)]
    key_phrases: Vec<String>,
}

#[derive(Deserialize)]
struct ConfidenceScores {
    positive: f64,
    neutral: f64,
    negative: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEntity {
    category: String,
    text: String,
    #[serde(default)]
    confidence_score: f64,
}

impl From<ApiEntity> for Entity {
    fn from(e: ApiEntity) -> Self {
        Entity {
            category: e.category,
            text: e.text,
            confidence: e.confidence_score,
        }
    }
}
