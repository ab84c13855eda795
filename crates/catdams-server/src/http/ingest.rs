//! Ingest endpoint — POST /ingest
//!
//! Accepts one event as either flat `user_text`/`ai_text` fields or a
//! `messages` array, runs the full detection pipeline, and returns the
//! verdict JSON. Capture surfaces (browser extension, desktop agent) post
//! here; the session id is whatever opaque string they carry.
//!
//! Errors: 400 `invalid_input`, 429 `overloaded` (also while draining),
//! 503 `dependency_unavailable` when both the interaction store and the
//! verdict sink are down, 500 for anything that should not surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use catdams_core::error::CatdamsError;
use catdams_core::types::{Event, Sender, Source, Verdict};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct IngestRequest {
    pub session_id: String,
    /// Event time; defaults to the server clock when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_text: Option<String>,
    #[serde(default)]
    pub ai_text: Option<String>,
    /// Alternative shape: a list of {sender, text} turns.
    #[serde(default)]
    pub messages: Option<Vec<IngestMessage>>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct IngestMessage {
    pub sender: Sender,
    pub text: String,
}

#[derive(Serialize)]
pub struct IngestError {
    pub error: &'static str,
    pub message: String,
}

impl IngestRequest {
    /// Flatten either input shape into one `Event`.
    fn into_event(self) -> Event {
        let (mut user_text, mut ai_text) = (
            self.user_text.unwrap_or_default(),
            self.ai_text.unwrap_or_default(),
        );

        if let Some(messages) = self.messages {
            for m in messages {
                let bucket = match m.sender {
                    Sender::User => &mut user_text,
                    _ => &mut ai_text,
                };
                if !bucket.is_empty() {
                    bucket.push('\n');
                }
                bucket.push_str(&m.text);
            }
        }

        let sender = Event::infer_sender(&user_text, &ai_text);
        Event {
            session_id: self.session_id.into(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source: Source {
                platform: self.platform.unwrap_or_default(),
                url: self.url,
            },
            user_text,
            ai_text,
            sender,
            metadata: self.metadata,
        }
    }
}

/// POST /ingest — analyze one event, return the verdict.
pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<Verdict>, (StatusCode, Json<IngestError>)> {
    let event = req.into_event();

    match state.orchestrator.process(event).await {
        Ok(verdict) => Ok(Json(verdict)),
        Err(e @ CatdamsError::InvalidInput(_)) => Err((
            StatusCode::BAD_REQUEST,
            Json(IngestError {
                error: "invalid_input",
                message: e.to_string(),
            }),
        )),
        // Draining rejects the same way a full queue does.
        Err(e @ (CatdamsError::Overloaded | CatdamsError::Shutdown)) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(IngestError {
                error: "overloaded",
                message: e.to_string(),
            }),
        )),
        // Every durable dependency is down — nothing could be recorded.
        Err(e @ (CatdamsError::Store(_) | CatdamsError::Sink(_))) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(IngestError {
                error: "dependency_unavailable",
                message: e.to_string(),
            }),
        )),
        Err(e) => {
            warn!(error = %e, "POST /ingest failed unexpectedly");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(IngestError {
                    error: "internal",
                    message: e.to_string(),
                }),
            ))
        }
    }
}
