//! Live verdict stream — GET /stream (WebSocket upgrade)
//!
//! Query params: `session_id` restricts to one session, `min_severity`
//! applies a severity floor. Each subscriber has its own bounded buffer;
//! falling behind drops that subscriber's oldest verdicts only.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use catdams_core::types::Severity;
use catdams_engine::hub::StreamFilter;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub min_severity: Option<String>,
}

/// Axum handler — upgrades HTTP to WebSocket at GET /stream.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let filter = StreamFilter {
        session_id: query.session_id.map(|s| s.as_str().into()),
        min_severity: query
            .min_severity
            .and_then(|s| s.parse::<Severity>().ok()),
    };
    ws.on_upgrade(move |socket| handle_connection(socket, state, filter))
}

/// Per-connection task — forwards verdicts until either side closes.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>, filter: StreamFilter) {
    info!("new verdict stream subscriber");
    let (mut tx, mut rx) = socket.split();
    let mut stream = state.orchestrator.hub().subscribe(filter);

    loop {
        tokio::select! {
            verdict = stream.next() => {
                let Some(verdict) = verdict else { break };
                let json = match serde_json::to_string(&*verdict) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "verdict serialization failed");
                        continue;
                    }
                };
                if tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "stream subscriber socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("verdict stream subscriber disconnected");
}
