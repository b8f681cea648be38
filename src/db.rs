use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::models::JobRecord;

/// Durable store of evaluated postings. One table, one row per posting id;
/// only ever touched by a single sequential process.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.init()?;
        debug!(path = %store.path.display(), "store initialized");
        Ok(store)
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobscout") {
            proj_dirs.data_dir().join("jobscout.db")
        } else {
            PathBuf::from("jobscout.db")
        }
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Idempotent schema creation. A failure here is fatal to the run:
    /// no further work is safe without durable state.
    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    title TEXT,
                    link TEXT,
                    application_link TEXT,
                    company TEXT,
                    description TEXT,
                    evaluation TEXT,
                    evaluation_score REAL,
                    decision TEXT,
                    visited_at TEXT,
                    notified INTEGER NOT NULL DEFAULT 0,
                    source TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_decision ON jobs(decision);
                CREATE INDEX IF NOT EXISTS idx_jobs_score ON jobs(evaluation_score);
                "#,
            )
            .context("Failed to initialize jobs table")
    }

    /// Whether a posting id has already been processed. Fails open: any
    /// storage fault is logged and reported as "not seen", so a broken
    /// store degrades to re-processing instead of killing the run.
    pub fn is_seen(&self, id: &str) -> bool {
        match self
            .conn
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", [id], |_| Ok(()))
        {
            Ok(()) => true,
            Err(rusqlite::Error::QueryReturnedNoRows) => false,
            Err(e) => {
                error!(id, error = %e, "seen-check failed, treating posting as new");
                false
            }
        }
    }

    /// Inserts or fully replaces the row for `record.id`. Write faults
    /// propagate: losing the write silently would break the seen invariant.
    pub fn upsert(&self, record: &JobRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO jobs (
                    id, title, link, application_link, company, description,
                    evaluation, evaluation_score, decision, visited_at, notified, source
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id,
                    record.title,
                    record.link,
                    record.application_link,
                    record.company,
                    record.description,
                    record.evaluation,
                    record.evaluation_score,
                    record.decision,
                    record.visited_at,
                    record.notified as i64,
                    record.source,
                ],
            )
            .with_context(|| format!("Failed to save job record for {}", record.id))?;
        Ok(())
    }
}

#[cfg(test)]
impl Store {
    pub fn row_count(&self) -> i64 {
        self.conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap()
    }

    pub fn notified_flag(&self, id: &str) -> Option<bool> {
        self.conn
            .query_row("SELECT notified FROM jobs WHERE id = ?1", [id], |row| {
                row.get::<_, i64>(0)
            })
            .ok()
            .map(|flag| flag != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, decision: &str, score: f64) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            title: "Frontend Developer".to_string(),
            link: id.to_string(),
            application_link: Some("https://apply.example.com".to_string()),
            company: "Acme".to_string(),
            description: "React, TypeScript, remote".to_string(),
            evaluation: r#"{"score":80}"#.to_string(),
            evaluation_score: score,
            decision: decision.to_string(),
            visited_at: "2026-01-01T00:00:00+00:00".to_string(),
            notified: false,
            source: "board".to_string(),
        }
    }

    #[test]
    fn test_seen_after_upsert() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.is_seen("https://example.com/jobs/1"));
        store.upsert(&record("https://example.com/jobs/1", "apply", 80.0)).unwrap();
        assert!(store.is_seen("https://example.com/jobs/1"));
        assert!(!store.is_seen("https://example.com/jobs/2"));
    }

    #[test]
    fn test_upsert_twice_keeps_one_row() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("job-1", "skip", 40.0)).unwrap();
        store.upsert(&record("job-1", "apply", 85.0)).unwrap();
        assert_eq!(store.row_count(), 1);

        // Second write wins.
        let (decision, score): (String, f64) = store
            .conn
            .query_row(
                "SELECT decision, evaluation_score FROM jobs WHERE id = 'job-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(decision, "apply");
        assert_eq!(score, 85.0);
    }

    #[test]
    fn test_is_seen_fails_open_on_storage_fault() {
        let store = Store::open_in_memory().unwrap();
        store.conn.execute_batch("DROP TABLE jobs").unwrap();
        assert!(!store.is_seen("job-1"));
    }

    #[test]
    fn test_upsert_propagates_storage_fault() {
        let store = Store::open_in_memory().unwrap();
        store.conn.execute_batch("DROP TABLE jobs").unwrap();
        assert!(store.upsert(&record("job-1", "apply", 80.0)).is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("job-1", "apply", 80.0)).unwrap();
        store.init().unwrap();
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_out_of_range_score_stored_as_is() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&record("job-1", "apply", 130.5)).unwrap();
        let score: f64 = store
            .conn
            .query_row("SELECT evaluation_score FROM jobs WHERE id = 'job-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(score, 130.5);
    }
}
