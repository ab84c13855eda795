use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use catdams_core::config::CONTEXT_WINDOW;
use catdams_core::types::{ContextTotals, ConversationContext, Event, InteractionRecord};
use catdams_store::InteractionStore;

use crate::hints;

/// Derives a `ConversationContext` from the interaction store.
///
/// Rebuilt per event; the orchestrator calls `build` after the event has
/// been appended, so the recent window already includes the current turn.
pub struct ContextBuilder {
    store: Arc<InteractionStore>,
    window: usize,
}

impl ContextBuilder {
    pub fn new(store: Arc<InteractionStore>) -> Self {
        Self {
            store,
            window: CONTEXT_WINDOW,
        }
    }

    pub fn with_window(store: Arc<InteractionStore>, window: usize) -> Self {
        Self { store, window }
    }

    /// Build the context for the current event. Store failures degrade to a
    /// minimal single-event context instead of propagating — the pipeline
    /// must keep moving.
    #[instrument(skip(self, event), fields(session = %event.session_id))]
    pub fn build(&self, event: &Event) -> ConversationContext {
        let recent = match self.store.recent(&event.session_id, self.window) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "store unavailable, building minimal context");
                return self.minimal(event);
            }
        };
        let meta = self.store.session_meta(&event.session_id).ok().flatten();

        let now = Utc::now();
        let (duration_seconds, session_age_seconds, total_messages) = match &meta {
            Some(m) => (
                (m.last_seen - m.first_seen).num_milliseconds() as f64 / 1000.0,
                (now - m.first_seen).num_milliseconds() as f64 / 1000.0,
                m.message_count,
            ),
            None => (0.0, 0.0, recent.len() as u64),
        };

        let user_messages = recent
            .iter()
            .filter(|r| !r.user_text.trim().is_empty())
            .count() as u64;
        let ai_messages = recent
            .iter()
            .filter(|r| !r.ai_text.trim().is_empty())
            .count() as u64;

        let hints = hints::scan_all(
            recent
                .iter()
                .map(|r| r.user_text.as_str())
                .chain(std::iter::once(event.user_text.as_str())),
        );

        ConversationContext {
            session_id: event.session_id.clone(),
            totals: ContextTotals {
                messages: total_messages,
                user_messages,
                ai_messages,
            },
            duration_seconds: duration_seconds.max(0.0),
            session_age_seconds: session_age_seconds.max(0.0),
            recent,
            hints,
            degraded: false,
        }
    }

    /// Context containing only the current event, flagged `degraded`.
    fn minimal(&self, event: &Event) -> ConversationContext {
        let now = Utc::now();
        let record = InteractionRecord {
            session_id: event.session_id.clone(),
            seq: 0,
            sender: event.sender,
            user_text: event.user_text.clone(),
            ai_text: event.ai_text.clone(),
            source: event.source.clone(),
            metadata: event.metadata.clone(),
            event_time: event.timestamp,
            ingest_time: now,
            verdict_id: None,
        };
        let has_user = !event.user_text.trim().is_empty() as u64;
        let has_ai = !event.ai_text.trim().is_empty() as u64;

        ConversationContext {
            session_id: event.session_id.clone(),
            totals: ContextTotals {
                messages: 1,
                user_messages: has_user,
                ai_messages: has_ai,
            },
            duration_seconds: 0.0,
            session_age_seconds: 0.0,
            hints: hints::scan(&event.user_text),
            recent: vec![record],
            degraded: true,
        }
    }
}
