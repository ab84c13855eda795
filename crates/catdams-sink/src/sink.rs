use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use catdams_core::types::{ModuleOutput, SessionId, Severity, Verdict};

use crate::error::{Result, SinkError};

/// Append-only durable log of verdicts and their per-module outputs.
///
/// Per-session insertion order is preserved by rowid; the (session_id, seq)
/// index serves the dashboard-feed queries.
pub struct VerdictSink {
    db: Mutex<Connection>,
}

/// Severity histogram returned by `aggregate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

impl SeverityCounts {
    pub fn total(&self) -> u64 {
        self.low + self.medium + self.high + self.critical
    }
}

impl VerdictSink {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Cheap liveness probe: the connection answers and the verdict table
    /// exists. The orchestrator consults this before accepting an event.
    pub fn healthy(&self) -> bool {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'verdicts'",
            [],
            |_| Ok(()),
        )
        .is_ok()
    }

    #[instrument(skip(self, verdict), fields(verdict_id = %verdict.verdict_id, session = %verdict.session_id))]
    pub fn write(&self, verdict: &Verdict) -> Result<()> {
        let outputs = serde_json::to_string(&verdict.outputs)?;
        let notes = serde_json::to_string(&verdict.synthesis_notes)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO verdicts
             (verdict_id, session_id, seq, severity, score, confidence,
              recommended_action, outputs, narrative, synthesis_notes,
              created_at, fusion_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                verdict.verdict_id,
                verdict.session_id.as_str(),
                verdict.seq as i64,
                verdict.severity.to_string(),
                verdict.aggregate_score,
                verdict.aggregate_confidence,
                verdict.recommended_action.to_string(),
                outputs,
                verdict.narrative,
                notes,
                verdict.created_at.to_rfc3339(),
                verdict.fusion_version as i64,
            ],
        )?;
        Ok(())
    }

    /// Verdicts for one session in sequence order, optionally bounded to a
    /// created_at range.
    #[instrument(skip(self), fields(session = %session_id))]
    pub fn find_by_session(
        &self,
        session_id: &SessionId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: usize,
    ) -> Result<Vec<Verdict>> {
        let db = self.db.lock().unwrap();
        let (from, to) = match range {
            Some((a, b)) => (a.to_rfc3339(), b.to_rfc3339()),
            // open range
            None => ("0000".to_string(), "9999".to_string()),
        };
        let mut stmt = db.prepare(
            "SELECT verdict_id, session_id, seq, severity, score, confidence,
                    recommended_action, outputs, narrative, synthesis_notes,
                    created_at, fusion_version
             FROM verdicts
             WHERE session_id = ?1 AND created_at >= ?2 AND created_at <= ?3
             ORDER BY seq
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![session_id.as_str(), from, to, limit as i64],
            row_to_verdict,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Severity histogram, optionally restricted to verdicts created at or
    /// after `since`.
    pub fn aggregate(&self, since: Option<DateTime<Utc>>) -> Result<SeverityCounts> {
        let db = self.db.lock().unwrap();
        let floor = since
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "0000".to_string());
        let mut stmt = db.prepare(
            "SELECT severity, COUNT(*) FROM verdicts
             WHERE created_at >= ?1 GROUP BY severity",
        )?;
        let rows = stmt.query_map(rusqlite::params![floor], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = SeverityCounts::default();
        for row in rows.filter_map(|r| r.ok()) {
            let n = row.1 as u64;
            match row.0.as_str() {
                "low" => counts.low += n,
                "medium" => counts.medium += n,
                "high" => counts.high += n,
                "critical" => counts.critical += n,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Delete verdicts created before the cutoff.
    #[instrument(skip(self))]
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let removed = db.execute(
            "DELETE FROM verdicts WHERE created_at < ?1",
            rusqlite::params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }
}

fn row_to_verdict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Verdict> {
    let severity: String = row.get(3)?;
    let action: String = row.get(6)?;
    let outputs: String = row.get(7)?;
    let notes: String = row.get(9)?;
    let created: String = row.get(10)?;

    Ok(Verdict {
        verdict_id: row.get(0)?,
        session_id: row.get::<_, String>(1)?.into(),
        seq: row.get::<_, i64>(2)? as u64,
        severity: severity.parse().unwrap_or(Severity::Low),
        aggregate_score: row.get(4)?,
        aggregate_confidence: row.get(5)?,
        recommended_action: action
            .parse()
            .unwrap_or(catdams_core::types::RecommendedAction::Monitor),
        outputs: serde_json::from_str::<Vec<ModuleOutput>>(&outputs).unwrap_or_default(),
        narrative: row.get(8)?,
        synthesis_notes: serde_json::from_str(&notes).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        fusion_version: row.get::<_, i64>(11)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catdams_core::types::{RecommendedAction, FUSION_VERSION};

    fn open_sink() -> VerdictSink {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        VerdictSink::new(conn)
    }

    fn verdict(session: &str, seq: u64, severity: Severity) -> Verdict {
        Verdict {
            verdict_id: Verdict::new_id(),
            session_id: session.into(),
            seq,
            severity,
            aggregate_score: 0.42,
            aggregate_confidence: 0.6,
            recommended_action: RecommendedAction::Review,
            outputs: Vec::new(),
            narrative: "test narrative".to_string(),
            synthesis_notes: vec!["degraded".to_string()],
            created_at: Utc::now(),
            fusion_version: FUSION_VERSION,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let sink = open_sink();
        sink.write(&verdict("s1", 1, Severity::Medium)).unwrap();
        let found = sink.find_by_session(&"s1".into(), None, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Medium);
        assert_eq!(found[0].recommended_action, RecommendedAction::Review);
        assert_eq!(found[0].synthesis_notes, vec!["degraded".to_string()]);
        assert!((found[0].aggregate_score - 0.42).abs() < 1e-12);
    }

    #[test]
    fn session_order_is_by_sequence() {
        let sink = open_sink();
        sink.write(&verdict("s", 2, Severity::Low)).unwrap();
        sink.write(&verdict("s", 1, Severity::High)).unwrap();
        sink.write(&verdict("s", 3, Severity::Low)).unwrap();
        let found = sink.find_by_session(&"s".into(), None, 10).unwrap();
        let seqs: Vec<u64> = found.iter().map(|v| v.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn initialised_sink_reports_healthy() {
        assert!(open_sink().healthy());
    }

    #[test]
    fn sink_without_schema_reports_unhealthy() {
        let sink = VerdictSink::new(Connection::open_in_memory().unwrap());
        assert!(!sink.healthy());
    }

    #[test]
    fn aggregate_counts_by_severity() {
        let sink = open_sink();
        sink.write(&verdict("a", 1, Severity::Low)).unwrap();
        sink.write(&verdict("a", 2, Severity::High)).unwrap();
        sink.write(&verdict("b", 1, Severity::High)).unwrap();
        let counts = sink.aggregate(None).unwrap();
        assert_eq!(counts.low, 1);
        assert_eq!(counts.high, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn duplicate_verdict_id_is_rejected() {
        let sink = open_sink();
        let v = verdict("s", 1, Severity::Low);
        sink.write(&v).unwrap();
        assert!(sink.write(&v).is_err());
    }

    #[test]
    fn prune_removes_old_verdicts() {
        let sink = open_sink();
        sink.write(&verdict("s", 1, Severity::Low)).unwrap();
        let removed = sink
            .prune_before(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(sink.aggregate(None).unwrap().total(), 0);
    }
}
