//! Persistent job queue.
//!
//! Claim semantics: `dequeue` selects the oldest runnable `queued` row,
//! flips it to `running` and increments `attempts` in a single
//! `UPDATE ... RETURNING` statement, so concurrent pollers can never claim
//! the same job. Retries re-queue with a future `run_after`; crash recovery
//! returns every `running` row to `queued` at startup.

use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{Database, now_millis};
use crate::error::{Result, StoreError};
use crate::models::{Job, JobStatus};

/// Parameters for a new queue entry.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub payload: Value,
    pub max_retries: i64,
    /// Earliest activation time (epoch millis); `None` = immediately.
    pub run_after: Option<i64>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            max_retries: 3,
            run_after: None,
        }
    }
}

impl Database {
    /// Inserts a `queued` job and returns its generated id.
    pub fn enqueue_job(&self, job: NewJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (id, type, payload, status, attempts, max_retries, run_after,
                                   created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    job.job_type,
                    job.payload.to_string(),
                    job.max_retries,
                    job.run_after,
                    now
                ],
            )?;
            Ok(())
        })?;
        info!(job_id = %id, job_type = %job.job_type, "job enqueued");
        Ok(id)
    }

    /// Atomically claims the oldest runnable job, or returns `None`.
    ///
    /// Ordering: `created_at` ascending, id as the tie-breaker.
    pub fn dequeue_job(&self) -> Result<Option<Job>> {
        let now = now_millis();
        self.with_conn(|conn| {
            conn.query_row(
                "UPDATE jobs
                 SET status = 'running', attempts = attempts + 1, updated_at = ?1
                 WHERE id = (
                     SELECT id FROM jobs
                     WHERE status = 'queued' AND (run_after IS NULL OR run_after <= ?1)
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1
                 )
                 RETURNING id, type, payload, status, result, error, attempts, max_retries,
                           run_after, created_at, updated_at",
                params![now],
                job_from_row,
            )
            .optional()?
            .transpose()
        })
    }

    /// Terminal success.
    pub fn complete_job(&self, id: &str, result: Option<&Value>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'done', result = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, result.map(|v| v.to_string()), now_millis()],
            )?;
            Ok(())
        })
    }

    /// Terminal failure.
    pub fn fail_job(&self, id: &str, error: &str) -> Result<()> {
        warn!(job_id = %id, error, "job failed permanently");
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, error, now_millis()],
            )?;
            Ok(())
        })
    }

    /// Re-queues a job with a future activation time (retry backoff).
    pub fn pause_job(&self, id: &str, run_after: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'queued', run_after = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, run_after, now_millis()],
            )?;
            Ok(())
        })
    }

    /// Returns all `running` jobs to `queued`.
    ///
    /// Called once at startup: a job stuck in `running` means the previous
    /// process died mid-work, and re-running it is the crash-safety contract.
    pub fn recover_running_jobs(&self) -> Result<usize> {
        let recovered = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET status = 'queued', updated_at = ?1 WHERE status = 'running'",
                params![now_millis()],
            )?)
        })?;
        if recovered > 0 {
            warn!(recovered, "returned interrupted jobs to the queue");
        }
        Ok(recovered)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, type, payload, status, result, error, attempts, max_retries,
                        run_after, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id],
                job_from_row,
            )
            .optional()?
            .transpose()?
            .ok_or(StoreError::NotFound {
                entity: "job",
                key: id.to_string(),
            })
        })
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Job>> {
    let payload_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let result_raw: Option<String> = row.get(4)?;
    Ok((|| {
        let result = match result_raw {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Job {
            id: row.get(0)?,
            job_type: row.get(1)?,
            payload: serde_json::from_str(&payload_raw)?,
            status: JobStatus::parse(&status_raw)?,
            result,
            error: row.get(5)?,
            attempts: row.get(6)?,
            max_retries: row.get(7)?,
            run_after: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enqueue(db: &Database, job_type: &str) -> String {
        db.enqueue_job(NewJob::new(job_type, json!({"n": 1}))).unwrap()
    }

    #[test]
    fn dequeue_claims_in_creation_order() {
        let db = Database::open_in_memory().unwrap();
        let first = enqueue(&db, "a");
        let second = enqueue(&db, "b");

        let job = db.dequeue_job().unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);

        let job = db.dequeue_job().unwrap().unwrap();
        assert_eq!(job.id, second);

        assert!(db.dequeue_job().unwrap().is_none());
    }

    #[test]
    fn run_after_defers_activation() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .enqueue_job(NewJob {
                job_type: "later".into(),
                payload: json!({}),
                max_retries: 3,
                run_after: Some(now_millis() + 60_000),
            })
            .unwrap();

        assert!(db.dequeue_job().unwrap().is_none());

        db.pause_job(&id, now_millis() - 1).unwrap();
        let job = db.dequeue_job().unwrap().unwrap();
        assert_eq!(job.id, id);
        // pause + claim both count as attempts only on claim
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn recover_returns_running_jobs_to_queue() {
        let db = Database::open_in_memory().unwrap();
        enqueue(&db, "a");
        enqueue(&db, "b");
        db.dequeue_job().unwrap().unwrap();
        db.dequeue_job().unwrap().unwrap();

        assert!(db.dequeue_job().unwrap().is_none());
        let recovered = db.recover_running_jobs().unwrap();
        assert_eq!(recovered, 2);

        let job = db.dequeue_job().unwrap().unwrap();
        assert_eq!(job.attempts, 2, "recovered job keeps its attempt count");
    }

    #[test]
    fn terminal_transitions_store_result_and_error() {
        let db = Database::open_in_memory().unwrap();
        let id = enqueue(&db, "t");
        db.dequeue_job().unwrap().unwrap();
        db.complete_job(&id, Some(&json!({"ok": true}))).unwrap();
        let job = db.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result.unwrap()["ok"], true);

        let id2 = enqueue(&db, "t2");
        db.dequeue_job().unwrap().unwrap();
        db.fail_job(&id2, "exploded").unwrap();
        let job2 = db.get_job(&id2).unwrap();
        assert_eq!(job2.status, JobStatus::Failed);
        assert_eq!(job2.error.as_deref(), Some("exploded"));
    }

    #[test]
    fn concurrent_dequeues_never_share_a_job() {
        use std::sync::Arc;
        let db = Arc::new(Database::open_in_memory().unwrap());
        for _ in 0..20 {
            db.enqueue_job(NewJob::new("x", json!({}))).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(job) = db.dequeue_job().unwrap() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 20, "every job claimed exactly once");
        assert_eq!(all.len(), 20, "no job claimed twice");
    }
}
