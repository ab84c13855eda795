use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::provider::ClassifyProvider;

const SYSTEM_PROMPT: &str = "You are a threat-analysis classifier. \
Answer with a single JSON object and nothing else.";

/// OpenAI-compatible chat-completions client used for semantic
/// classification. Temperature 0 and JSON response format — the gateway
/// validates the returned document against the caller's schema.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl ChatCompletionsClient {
    /// `endpoint` is the full chat-completions URL, no trailing slash
    /// handling is applied.
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl ClassifyProvider for ChatCompletionsClient {
    fn name(&self) -> &str {
        "llm"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn classify(&self, prompt: &str) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        debug!(model = %self.model, "sending classification request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
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
            warn!(status, body = %text, "LLM API error");
            return Err(GatewayError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Parse("response has no choices".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| GatewayError::Parse(format!("model did not return JSON: {}", e)))
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}
