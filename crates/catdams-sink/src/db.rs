use rusqlite::Connection;

use crate::error::Result;

/// Initialise the verdict log. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS verdicts (
            verdict_id         TEXT PRIMARY KEY,
            session_id         TEXT NOT NULL,
            seq                INTEGER NOT NULL,
            severity           TEXT NOT NULL,
            score              REAL NOT NULL,
            confidence         REAL NOT NULL,
            recommended_action TEXT NOT NULL,
            outputs            TEXT NOT NULL,
            narrative          TEXT NOT NULL,
            synthesis_notes    TEXT NOT NULL,
            created_at         TEXT NOT NULL,
            fusion_version     INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_verdicts_session
            ON verdicts(session_id, seq);
        CREATE INDEX IF NOT EXISTS idx_verdicts_created
            ON verdicts(created_at);",
    )?;
    Ok(())
}
