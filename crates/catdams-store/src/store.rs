use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use catdams_core::config::SESSION_IDLE_CLOSE_SECS;
use catdams_core::types::{Event, InteractionRecord, SessionId, Source};

use crate::error::{Result, StoreError};

/// Append-only per-session interaction log — the single source of truth for
/// conversation history.
///
/// Wraps a single SQLite connection in a `Mutex`. The lock also serializes
/// appends, which is what keeps per-session sequence numbers strictly
/// monotonic without a separate per-session latch.
pub struct InteractionStore {
    db: Mutex<Connection>,
}

/// Aggregate view of one session, maintained alongside the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
}

impl SessionMeta {
    /// Sessions idle longer than the close window count as closed. Their
    /// records remain queryable until retention expiry.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_seen).num_seconds() > SESSION_IDLE_CLOSE_SECS
    }
}

impl InteractionStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Cheap liveness probe: the connection answers and the log table
    /// exists. The orchestrator consults this before accepting an event.
    pub fn healthy(&self) -> bool {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'interactions'",
            [],
            |_| Ok(()),
        )
        .is_ok()
    }

    /// Append an event, assigning the next per-session sequence number.
    ///
    /// Unknown session ids create an implicit session whose `first_seen` is
    /// the event's own timestamp.
    #[instrument(skip(self, event), fields(session = %event.session_id))]
    pub fn append(&self, event: &Event) -> Result<InteractionRecord> {
        let now = Utc::now();
        let metadata = serde_json::to_string(&event.metadata)?;
        let session = event.session_id.as_str();

        let db = self.db.lock().unwrap();

        // MAX(seq)+1 under the connection lock — concurrent appends to the
        // same session cannot race.
        let seq: u64 = db.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM interactions WHERE session_id = ?1",
            rusqlite::params![session],
            |row| row.get::<_, i64>(0).map(|v| v as u64),
        )?;

        db.execute(
            "INSERT INTO interactions
             (session_id, seq, sender, user_text, ai_text, platform, url,
              metadata, event_time, ingest_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                session,
                seq as i64,
                event.sender.to_string(),
                event.user_text,
                event.ai_text,
                event.source.platform,
                event.source.url,
                metadata,
                event.timestamp.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        db.execute(
            "INSERT INTO session_meta (session_id, first_seen, last_seen, message_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(session_id) DO UPDATE SET
                 last_seen     = ?3,
                 message_count = message_count + 1",
            rusqlite::params![session, event.timestamp.to_rfc3339(), now.to_rfc3339()],
        )?;

        Ok(InteractionRecord {
            session_id: event.session_id.clone(),
            seq,
            sender: event.sender,
            user_text: event.user_text.clone(),
            ai_text: event.ai_text.clone(),
            source: event.source.clone(),
            metadata: event.metadata.clone(),
            event_time: event.timestamp,
            ingest_time: now,
            verdict_id: None,
        })
    }

    /// Last `n` records for a session, ordered newest-last.
    #[instrument(skip(self), fields(session = %session_id))]
    pub fn recent(&self, session_id: &SessionId, n: usize) -> Result<Vec<InteractionRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT session_id, seq, sender, user_text, ai_text, platform, url,
                    metadata, event_time, ingest_time, verdict_id
             FROM interactions
             WHERE session_id = ?1
             ORDER BY seq DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![session_id.as_str(), n as i64],
            row_to_record,
        )?;
        let mut records: Vec<InteractionRecord> = rows.filter_map(|r| r.ok()).collect();
        records.reverse();
        Ok(records)
    }

    /// Last activity time for a session, or `None` if the session is unknown.
    pub fn touch(&self, session_id: &SessionId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.session_meta(session_id)?.map(|m| m.last_seen))
    }

    /// Aggregate metadata for a session.
    pub fn session_meta(&self, session_id: &SessionId) -> Result<Option<SessionMeta>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT session_id, first_seen, last_seen, message_count
             FROM session_meta WHERE session_id = ?1",
            rusqlite::params![session_id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        ) {
            Ok((id, first, last, count)) => Ok(Some(SessionMeta {
                session_id: id.into(),
                first_seen: parse_time(&first),
                last_seen: parse_time(&last),
                message_count: count as u64,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Attach the verdict id to an already-stored record — the only mutation
    /// the log permits.
    #[instrument(skip(self, verdict_id), fields(session = %session_id, seq))]
    pub fn attach_verdict(
        &self,
        session_id: &SessionId,
        seq: u64,
        verdict_id: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE interactions SET verdict_id = ?1
             WHERE session_id = ?2 AND seq = ?3",
            rusqlite::params![verdict_id, session_id.as_str(), seq as i64],
        )?;
        if changed == 0 {
            return Err(StoreError::NoSuchRecord {
                session_id: session_id.to_string(),
                seq,
            });
        }
        Ok(())
    }

    /// Delete records ingested before the cutoff. Returns how many rows went.
    #[instrument(skip(self))]
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM interactions WHERE ingest_time < ?1",
            rusqlite::params![cutoff.to_rfc3339()],
        )?;
        db.execute(
            "DELETE FROM session_meta
             WHERE session_id NOT IN (SELECT DISTINCT session_id FROM interactions)",
            [],
        )?;
        Ok(removed)
    }
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<InteractionRecord> {
    let sender_str: String = row.get(2)?;
    let metadata_str: String = row.get(7)?;
    let event_time: String = row.get(8)?;
    let ingest_time: String = row.get(9)?;

    Ok(InteractionRecord {
        session_id: row.get::<_, String>(0)?.into(),
        seq: row.get::<_, i64>(1)? as u64,
        sender: sender_str.parse().unwrap_or(catdams_core::Sender::Mixed),
        user_text: row.get(3)?,
        ai_text: row.get(4)?,
        source: Source {
            platform: row.get(5)?,
            url: row.get(6)?,
        },
        metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata_str)
            .unwrap_or_default(),
        event_time: parse_time(&event_time),
        ingest_time: parse_time(&ingest_time),
        verdict_id: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> InteractionStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        InteractionStore::new(conn)
    }

    fn event(session: &str, user: &str, ai: &str) -> Event {
        Event {
            session_id: session.into(),
            timestamp: Utc::now(),
            source: Source {
                platform: "test".to_string(),
                url: None,
            },
            user_text: user.to_string(),
            ai_text: ai.to_string(),
            sender: Event::infer_sender(user, ai),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn seq_is_monotonic_per_session() {
        let store = open_store();
        let a1 = store.append(&event("a", "one", "")).unwrap();
        let b1 = store.append(&event("b", "one", "")).unwrap();
        let a2 = store.append(&event("a", "two", "")).unwrap();
        assert_eq!(a1.seq, 1);
        assert_eq!(b1.seq, 1);
        assert_eq!(a2.seq, 2);
    }

    #[test]
    fn recent_is_newest_last_and_windowed() {
        let store = open_store();
        for i in 0..5 {
            store.append(&event("s", &format!("msg {}", i), "")).unwrap();
        }
        let recent = store.recent(&"s".into(), 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].user_text, "msg 2");
        assert_eq!(recent[2].user_text, "msg 4");
        assert_eq!(recent[2].seq, 5);
    }

    #[test]
    fn initialised_store_reports_healthy() {
        assert!(open_store().healthy());
    }

    #[test]
    fn store_without_schema_reports_unhealthy() {
        let store = InteractionStore::new(Connection::open_in_memory().unwrap());
        assert!(!store.healthy());
    }

    #[test]
    fn touch_unknown_session_is_none() {
        let store = open_store();
        assert!(store.touch(&"nope".into()).unwrap().is_none());
    }

    #[test]
    fn session_meta_counts_messages() {
        let store = open_store();
        store.append(&event("s", "hi", "")).unwrap();
        store.append(&event("s", "", "hello")).unwrap();
        let meta = store.session_meta(&"s".into()).unwrap().unwrap();
        assert_eq!(meta.message_count, 2);
        assert!(!meta.is_closed(Utc::now()));
    }

    #[test]
    fn idle_session_counts_as_closed() {
        let store = open_store();
        store.append(&event("s", "hi", "")).unwrap();
        let meta = store.session_meta(&"s".into()).unwrap().unwrap();
        let later = Utc::now() + chrono::Duration::seconds(SESSION_IDLE_CLOSE_SECS + 1);
        assert!(meta.is_closed(later));
    }

    #[test]
    fn attach_verdict_sets_id_once() {
        let store = open_store();
        let rec = store.append(&event("s", "hi", "")).unwrap();
        store.attach_verdict(&rec.session_id, rec.seq, "v-1").unwrap();
        let recent = store.recent(&rec.session_id, 1).unwrap();
        assert_eq!(recent[0].verdict_id.as_deref(), Some("v-1"));
    }

    #[test]
    fn attach_verdict_on_missing_record_errors() {
        let store = open_store();
        let err = store.attach_verdict(&"s".into(), 7, "v-1").unwrap_err();
        assert!(matches!(err, StoreError::NoSuchRecord { .. }));
    }

    #[test]
    fn prune_removes_old_rows() {
        let store = open_store();
        store.append(&event("s", "hi", "")).unwrap();
        let removed = store
            .prune_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.recent(&"s".into(), 10).unwrap().is_empty());
        assert!(store.session_meta(&"s".into()).unwrap().is_none());
    }
}
