use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Semantic classification provider — an LLM asked to return structured
/// JSON for a classification prompt.
#[async_trait]
pub trait ClassifyProvider: Send + Sync {
    /// Provider name for logging, breaker labels, and cache keys.
    fn name(&self) -> &str;

    /// Model identifier, part of the cache key.
    fn model(&self) -> &str;

    /// Run the prompt and return the parsed JSON document.
    async fn classify(&self, prompt: &str) -> Result<serde_json::Value>;
}

/// Which text-analytics services to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextService {
    Sentiment,
    Entities,
    KeyPhrases,
    Pii,
}

/// Sentiment split the way text-analytics APIs report it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SentimentScores {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
}

/// A recognised entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub category: String,
    pub text: String,
    pub confidence: f64,
}

/// Combined output of the requested text-analytics services. Services not
/// requested come back empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextSignals {
    pub sentiment: SentimentScores,
    pub entities: Vec<Entity>,
    pub key_phrases: Vec<String>,
    /// PII entities (credit cards, SSNs, emails, …) found in the text.
    pub pii: Vec<Entity>,
}

/// Text-analytics provider (sentiment, entities, key phrases, PII).
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, text: &str, services: &[TextService]) -> Result<TextSignals>;
}
