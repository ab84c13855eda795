use rusqlite::Connection;

use crate::error::Result;

/// Initialise the interaction log tables and indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS interactions (
            session_id  TEXT NOT NULL,
            seq         INTEGER NOT NULL,
            sender      TEXT NOT NULL,
            user_text   TEXT NOT NULL,
            ai_text     TEXT NOT NULL,
            platform    TEXT NOT NULL DEFAULT '',
            url         TEXT,
            metadata    TEXT NOT NULL DEFAULT '{}',
            event_time  TEXT NOT NULL,
            ingest_time TEXT NOT NULL,
            verdict_id  TEXT,
            PRIMARY KEY (session_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_interactions_ingest
            ON interactions(ingest_time);

        CREATE TABLE IF NOT EXISTS session_meta (
            session_id    TEXT PRIMARY KEY,
            first_seen    TEXT NOT NULL,
            last_seen     TEXT NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0
        );",
    )?;
    Ok(())
}
