use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use catdams_core::config::CatdamsConfig;
use catdams_engine::Orchestrator;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CatdamsConfig,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: CatdamsConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ingest", post(crate::http::ingest::ingest_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/verdicts", get(crate::http::verdicts::verdicts_handler))
        .route("/stream", get(crate::ws::stream::stream_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
