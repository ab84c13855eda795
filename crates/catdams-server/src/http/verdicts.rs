//! Verdict history — GET /verdicts?session_id=…&limit=…
//!
//! Dashboards and analytics consume the sink through this read path.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use catdams_core::types::Verdict;

use crate::app::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct VerdictsQuery {
    pub session_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct VerdictsError {
    pub error: String,
}

pub async fn verdicts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerdictsQuery>,
) -> Result<Json<Vec<Verdict>>, (StatusCode, Json<VerdictsError>)> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    match state
        .orchestrator
        .sink()
        .find_by_session(&query.session_id.as_str().into(), None, limit)
    {
        Ok(verdicts) => Ok(Json(verdicts)),
        Err(e) => {
            warn!(error = %e, "GET /verdicts failed");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(VerdictsError {
                    error: "dependency_unavailable".to_string(),
                }),
            ))
        }
    }
}
