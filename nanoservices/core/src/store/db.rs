use rusqlite::{params, Connection};
use std::path::Path;

use crate::convert::RecordRejection;
use crate::destinations::FailedBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Aborted,
    Crashed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Aborted => "aborted",
            RunStatus::Crashed => "crashed",
        }
    }
}

/// Final counters written when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub fetched: usize,
    pub rejected: usize,
    pub written: usize,
    pub failed: usize,
}

/// SQLite ledger of bridge runs and of every record that did not reach the
/// destination, kept for offline reprocessing.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let ledger = Self { conn };
        ledger.migrate()?;
        Ok(ledger)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self { conn };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bridge_runs (
                id TEXT PRIMARY KEY,
                bridge TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                fetched INTEGER,
                rejected INTEGER,
                written INTEGER,
                failed INTEGER,
                error TEXT
            );
            CREATE TABLE IF NOT EXISTS rejected_records (
                run_id TEXT NOT NULL REFERENCES bridge_runs(id),
                record_index INTEGER NOT NULL,
                column_name TEXT,
                reason TEXT NOT NULL,
                raw TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS failed_batches (
                run_id TEXT NOT NULL REFERENCES bridge_runs(id),
                batch INTEGER NOT NULL,
                record_indexes TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bridge_runs_bridge ON bridge_runs(bridge);
            CREATE INDEX IF NOT EXISTS idx_rejected_records_run_id ON rejected_records(run_id);
            CREATE INDEX IF NOT EXISTS idx_failed_batches_run_id ON failed_batches(run_id);",
        )?;
        Ok(())
    }

    /// Record a new run as started and return its id.
    pub fn start_run(&self, bridge: &str, started_at: &str) -> Result<String, rusqlite::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO bridge_runs (id, bridge, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, bridge, RunStatus::Running.as_str(), started_at],
        )?;
        Ok(id)
    }

    pub fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        finished_at: &str,
        counts: RunCounts,
        error: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE bridge_runs
             SET status = ?2, finished_at = ?3, fetched = ?4, rejected = ?5, written = ?6, failed = ?7, error = ?8
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                finished_at,
                counts.fetched as i64,
                counts.rejected as i64,
                counts.written as i64,
                counts.failed as i64,
                error
            ],
        )?;
        Ok(())
    }

    pub fn record_rejections(&mut self, run_id: &str, rejections: &[RecordRejection]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rejected_records (run_id, record_index, column_name, reason, raw)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for rejection in rejections {
                let raw = serde_json::to_string(&rejection.raw).unwrap_or_default();
                stmt.execute(params![
                    run_id,
                    rejection.index as i64,
                    rejection.column(),
                    rejection.cause.to_string(),
                    raw
                ])?;
            }
        }
        tx.commit()
    }

    pub fn record_failed_batches(&mut self, run_id: &str, batches: &[FailedBatch]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO failed_batches (run_id, batch, record_indexes, reason) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for batch in batches {
                let indexes = serde_json::to_string(&batch.records).unwrap_or_default();
                stmt.execute(params![run_id, batch.batch as i64, indexes, batch.reason])?;
            }
        }
        tx.commit()
    }

    /// Mark runs left in `running` by a crashed process.
    pub fn mark_inflight_as_crashed(&self) -> Result<usize, rusqlite::Error> {
        self.conn.execute(
            "UPDATE bridge_runs SET status = ?1 WHERE status = ?2",
            params![RunStatus::Crashed.as_str(), RunStatus::Running.as_str()],
        )
    }

    /// Get recent runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<BridgeRunRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, bridge, status, started_at, finished_at, fetched, rejected, written, failed, error
             FROM bridge_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(BridgeRunRow {
                id: row.get(0)?,
                bridge: row.get(1)?,
                status: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                fetched: row.get(5)?,
                rejected: row.get(6)?,
                written: row.get(7)?,
                failed: row.get(8)?,
                error: row.get(9)?,
            })
        })?;
        rows.collect()
    }

    pub fn rejections_for(&self, run_id: &str) -> Result<Vec<RejectedRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT record_index, column_name, reason, raw
             FROM rejected_records WHERE run_id = ?1 ORDER BY record_index",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RejectedRow {
                record_index: row.get(0)?,
                column_name: row.get(1)?,
                reason: row.get(2)?,
                raw: row.get(3)?,
            })
        })?;
        rows.collect()
    }

    pub fn failed_batches_for(&self, run_id: &str) -> Result<Vec<FailedBatchRow>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT batch, record_indexes, reason FROM failed_batches WHERE run_id = ?1 ORDER BY batch",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(FailedBatchRow { batch: row.get(0)?, record_indexes: row.get(1)?, reason: row.get(2)? })
        })?;
        rows.collect()
    }
}

#[derive(Debug)]
pub struct BridgeRunRow {
    pub id: String,
    pub bridge: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub fetched: Option<i64>,
    pub rejected: Option<i64>,
    pub written: Option<i64>,
    pub failed: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct RejectedRow {
    pub record_index: i64,
    pub column_name: Option<String>,
    pub reason: String,
    /// Source fields as a JSON object
    pub raw: String,
}

#[derive(Debug)]
pub struct FailedBatchRow {
    pub batch: i64,
    /// JSON array of input record indexes
    pub record_indexes: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConversionError, RejectionCause};
    use crate::model::RawRecord;

    #[test]
    fn start_and_complete_run() {
        let ledger = Ledger::in_memory().unwrap();
        let id = ledger.start_run("sales", "2026-02-03T10:00:00Z").unwrap();

        let runs = ledger.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "running");

        let counts = RunCounts { fetched: 10, rejected: 1, written: 6, failed: 3 };
        ledger
            .complete_run(&id, RunStatus::CompletedWithErrors, "2026-02-03T10:00:05Z", counts, None)
            .unwrap();

        let runs = ledger.recent_runs(10).unwrap();
        assert_eq!(runs[0].status, "completed_with_errors");
        assert_eq!(runs[0].written, Some(6));
        assert_eq!(runs[0].failed, Some(3));
    }

    #[test]
    fn rejections_keep_index_column_and_raw_fields() {
        let mut ledger = Ledger::in_memory().unwrap();
        let id = ledger.start_run("sales", "2026-02-03T10:00:00Z").unwrap();

        let raw: RawRecord = [("id".to_string(), "x".to_string())].into_iter().collect();
        let rejections = vec![
            RecordRejection {
                index: 4,
                cause: RejectionCause::Conversion {
                    column: "id".into(),
                    error: ConversionError::NotAnInteger { value: "x".into() },
                },
                raw,
            },
            RecordRejection { index: 1, cause: RejectionCause::Unreadable("bad utf-8".into()), raw: RawRecord::new() },
        ];
        ledger.record_rejections(&id, &rejections).unwrap();

        let rows = ledger.rejections_for(&id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record_index, 1);
        assert_eq!(rows[0].column_name, None);
        assert_eq!(rows[1].column_name.as_deref(), Some("id"));
        assert_eq!(rows[1].raw, r#"{"id":"x"}"#);
        assert!(rows[1].reason.contains("not an integer"));
    }

    #[test]
    fn failed_batches_are_listed_by_batch_number() {
        let mut ledger = Ledger::in_memory().unwrap();
        let id = ledger.start_run("sales", "2026-02-03T10:00:00Z").unwrap();
        let batches = vec![
            FailedBatch { batch: 3, records: vec![6, 7], reason: "deadlock".into() },
            FailedBatch { batch: 0, records: vec![0, 1], reason: "check violation".into() },
        ];
        ledger.record_failed_batches(&id, &batches).unwrap();

        let rows = ledger.failed_batches_for(&id).unwrap();
        assert_eq!(rows[0].batch, 0);
        assert_eq!(rows[1].record_indexes, "[6,7]");
    }

    #[test]
    fn mark_inflight_as_crashed() {
        let ledger = Ledger::in_memory().unwrap();
        let a = ledger.start_run("a", "2026-02-03T10:00:00Z").unwrap();
        let b = ledger.start_run("b", "2026-02-03T10:00:01Z").unwrap();
        ledger
            .complete_run(&b, RunStatus::Completed, "2026-02-03T10:00:05Z", RunCounts::default(), None)
            .unwrap();

        assert_eq!(ledger.mark_inflight_as_crashed().unwrap(), 1);

        let runs = ledger.recent_runs(10).unwrap();
        assert_eq!(runs.iter().find(|r| r.id == a).unwrap().status, "crashed");
        assert_eq!(runs.iter().find(|r| r.id == b).unwrap().status, "completed");
    }
}
