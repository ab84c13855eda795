//! Liveness + component status — GET /health

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Circuit state per configured provider, e.g. [["llm","closed"]].
    pub providers: Vec<(String, &'static str)>,
    pub stream_subscribers: usize,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        providers: state.orchestrator.gateway().circuit_report(),
        stream_subscribers: state.orchestrator.hub().subscriber_count(),
    })
}
