use super::QueuedJob;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Terminal store for jobs that exhausted retries or failed permanently.
///
/// Dead-lettered jobs are inert: surfaced through the operator endpoint and
/// the `dead-letter list` command, never auto-retried.
pub struct DeadLetterStore {
    db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub id: String,
    pub job_id: String,
    pub webhook_id: Option<String>,
    pub event: String,
    pub payload: String,
    pub error: String,
    pub error_class: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterStore {
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            db_path: workspace_dir.join("queue").join("dead_letters.db"),
        }
    }

    pub fn record(
        &self,
        job: &QueuedJob,
        error: &str,
        error_class: &str,
        now: DateTime<Utc>,
    ) -> Result<DeadLetterRecord> {
        let record = DeadLetterRecord {
            id: Uuid::new_v4().to_string(),
            job_id: job.job_id.to_string(),
            webhook_id: job.webhook_id.clone(),
            event: job.event.to_string(),
            payload: job.payload.to_string(),
            error: error.to_string(),
            error_class: error_class.to_string(),
            attempts: job.attempt,
            enqueued_at: job.enqueued_at,
            dead_lettered_at: now,
        };

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO dead_letters (
                    id, job_id, webhook_id, event, payload, error, error_class,
                    attempts, enqueued_at, dead_lettered_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.job_id,
                    record.webhook_id,
                    record.event,
                    record.payload,
                    record.error,
                    record.error_class,
                    record.attempts,
                    record.enqueued_at.to_rfc3339(),
                    record.dead_lettered_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert dead-letter record")?;
            Ok(())
        })?;

        Ok(record)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<DeadLetterRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, job_id, webhook_id, event, payload, error, error_class,
                        attempts, enqueued_at, dead_lettered_at
                 FROM dead_letters
                 ORDER BY dead_lettered_at DESC
                 LIMIT ?1",
            )?;

            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (
                    id,
                    job_id,
                    webhook_id,
                    event,
                    payload,
                    error,
                    error_class,
                    attempts,
                    enqueued_at_raw,
                    dead_lettered_at_raw,
                ) = row?;
                records.push(DeadLetterRecord {
                    id,
                    job_id,
                    webhook_id,
                    event,
                    payload,
                    error,
                    error_class,
                    attempts: u32::try_from(attempts).unwrap_or(0),
                    enqueued_at: parse_rfc3339(&enqueued_at_raw)?,
                    dead_lettered_at: parse_rfc3339(&dead_lettered_at_raw)?,
                });
            }
            Ok(records)
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| {
                row.get(0)
            })?;
            Ok(usize::try_from(count).unwrap_or(usize::MAX))
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create queue directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(&self.db_path).with_context(|| {
            format!("Failed to open dead-letter DB: {}", self.db_path.display())
        })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                id               TEXT PRIMARY KEY,
                job_id           TEXT NOT NULL,
                webhook_id       TEXT,
                event            TEXT NOT NULL,
                payload          TEXT NOT NULL,
                error            TEXT NOT NULL,
                error_class      TEXT NOT NULL,
                attempts         INTEGER NOT NULL,
                enqueued_at      TEXT NOT NULL,
                dead_lettered_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dead_letters_at ON dead_letters(dead_lettered_at);",
        )
        .context("Failed to initialize dead-letter schema")?;

        f(&conn)
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in dead-letter store: {raw}"))
}

impl std::fmt::Debug for DeadLetterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::EventType;
    use tempfile::TempDir;

    fn sample_job(id: &str) -> QueuedJob {
        let mut job = QueuedJob::new(
            Some(id.into()),
            EventType::MessageCreated,
            serde_json::json!({"id": id, "event": "message_created"}),
            5,
            Utc::now(),
        );
        job.attempt = 5;
        job
    }

    #[test]
    fn record_and_list_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = DeadLetterStore::new(tmp.path());
        let now = Utc::now();

        store
            .record(&sample_job("w1"), "crm transient failure", "transient", now)
            .unwrap();

        let records = store.list(10).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.webhook_id.as_deref(), Some("w1"));
        assert_eq!(record.event, "message_created");
        assert_eq!(record.error_class, "transient");
        assert_eq!(record.attempts, 5);
        assert!(record.payload.contains("message_created"));
    }

    #[test]
    fn count_tracks_inserts() {
        let tmp = TempDir::new().unwrap();
        let store = DeadLetterStore::new(tmp.path());
        let now = Utc::now();

        assert_eq!(store.count().unwrap(), 0);
        store
            .record(&sample_job("w1"), "boom", "permanent", now)
            .unwrap();
        store
            .record(&sample_job("w2"), "boom", "permanent", now)
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn list_respects_limit() {
        let tmp = TempDir::new().unwrap();
        let store = DeadLetterStore::new(tmp.path());
        let now = Utc::now();

        for n in 0..5 {
            store
                .record(&sample_job(&format!("w{n}")), "boom", "permanent", now)
                .unwrap();
        }
        assert_eq!(store.list(3).unwrap().len(), 3);
    }
}
