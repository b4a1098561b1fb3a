use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// SQLite record of runs and the checkpoints they wrote. Replaces scanning
/// the data directory for the newest file.
pub struct CheckpointIndex {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub canonical_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub id: i64,
    pub run_id: String,
    pub snapshot_path: String,
    pub point_count: usize,
    pub written_at: String,
}

impl CheckpointIndex {
    pub fn open(db_path: &str) -> Result<Self> {
        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                started_at TIMESTAMP NOT NULL,
                canonical_path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                snapshot_path TEXT NOT NULL,
                point_count INTEGER NOT NULL,
                written_at TIMESTAMP NOT NULL,
                FOREIGN KEY(run_id) REFERENCES runs(run_id)
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_run_id ON checkpoints(run_id);
            "#
        )?;

        Ok(Self { conn })
    }

    /// Register a run; re-registering an existing run id is a no-op
    pub fn register_run(&self, run_id: &str, canonical_path: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO runs (run_id, started_at, canonical_path) VALUES (?1, ?2, ?3)",
            params![run_id, Utc::now().to_rfc3339(), canonical_path],
        )?;
        Ok(())
    }

    pub fn record_checkpoint(&self, run_id: &str, snapshot_path: &str, point_count: usize) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO checkpoints (run_id, snapshot_path, point_count, written_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id, snapshot_path, point_count as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let run = self.conn
            .query_row(
                "SELECT run_id, started_at, canonical_path FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok(RunRecord {
                    run_id: row.get(0)?,
                    started_at: row.get(1)?,
                    canonical_path: row.get(2)?,
                }),
            )
            .optional()?;
        Ok(run)
    }

    /// Run that checkpointed most recently, else the most recently registered one
    pub fn latest_run(&self) -> Result<Option<RunRecord>> {
        let run = self.conn
            .query_row(
                "SELECT r.run_id, r.started_at, r.canonical_path
                 FROM runs r
                 LEFT JOIN checkpoints c ON c.run_id = r.run_id
                 GROUP BY r.run_id
                 ORDER BY COALESCE(MAX(c.id), 0) DESC, r.rowid DESC
                 LIMIT 1",
                [],
                |row| Ok(RunRecord {
                    run_id: row.get(0)?,
                    started_at: row.get(1)?,
                    canonical_path: row.get(2)?,
                }),
            )
            .optional()?;
        Ok(run)
    }

    pub fn checkpoints(&self, run_id: &str) -> Result<Vec<CheckpointRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, snapshot_path, point_count, written_at
             FROM checkpoints
             WHERE run_id = ?1
             ORDER BY id"
        )?;

        let rows = stmt.query_map(params![run_id], |row| {
            let count: i64 = row.get(3)?;
            Ok(CheckpointRecord {
                id: row.get(0)?,
                run_id: row.get(1)?,
                snapshot_path: row.get(2)?,
                point_count: count.max(0) as usize,
                written_at: row.get(4)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    pub fn count_checkpoints(&self, run_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}
