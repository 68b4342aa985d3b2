//! Worker loop: polls the queue and dispatches to type-keyed processors.
//!
//! Scheduling model: one tick per poll interval on a single logical thread;
//! each tick handles at most one job and completes before the next tick.
//! Processors may fan out internally (the ingester's per-PR pool), but the
//! loop itself never runs two jobs at once.
//!
//! Failure policy: error messages matching rate-limit patterns use an
//! extended base delay (60s), everything else 1s; the retry delay is
//! `base · 2^(attempts-1)`. Jobs with attempts left are re-queued via
//! `pause`; exhausted jobs are failed and the on-job-failed callback fires
//! (used to mirror the failure onto the owning scan).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use data_store::{Database, Job, db::now_millis};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::errors::ScanResult;
use crate::processors::Processor;

lazy_static! {
    /// Intentionally broad: chat providers report throttling inconsistently.
    /// False positives merely slow retries down.
    static ref RATE_LIMIT_RE: Regex =
        Regex::new(r"(?i)(\b429\b|rate.?limit|token limit|enqueued.*limit)")
            .expect("static regex");
}

/// Whether an error message looks like a rate-limit condition.
pub fn is_rate_limit_message(message: &str) -> bool {
    RATE_LIMIT_RE.is_match(message)
}

/// Tuning knobs for the loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// Retry base for ordinary failures.
    pub base_delay: Duration,
    /// Retry base for rate-limit-looking failures.
    pub rate_limit_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            base_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(60),
        }
    }
}

/// Callback fired when a job fails permanently.
pub type OnJobFailed = Box<dyn Fn(&Job, &str) + Send + Sync>;

/// Queue poller with a `type → processor` registry.
pub struct Worker {
    db: Arc<Database>,
    cfg: WorkerConfig,
    processors: HashMap<&'static str, Processor>,
    on_job_failed: Option<OnJobFailed>,
}

impl Worker {
    pub fn new(db: Arc<Database>, cfg: WorkerConfig) -> Self {
        Self {
            db,
            cfg,
            processors: HashMap::new(),
            on_job_failed: None,
        }
    }

    /// Registers a processor under its job type.
    pub fn register(&mut self, processor: Processor) {
        self.processors.insert(processor.job_type(), processor);
    }

    /// Sets the permanent-failure hook.
    pub fn set_on_job_failed(&mut self, cb: OnJobFailed) {
        self.on_job_failed = Some(cb);
    }

    /// Runs until `shutdown` flips to `true`; stops at a tick boundary.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.cfg.poll_interval.as_millis() as u64, "worker loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "worker tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("worker loop stopping at tick boundary");
                        return;
                    }
                }
            }
        }
    }

    /// One poll: claim, dispatch, settle. Returns `false` on an empty queue.
    pub async fn tick(&self) -> ScanResult<bool> {
        let Some(job) = self.db.dequeue_job()? else {
            return Ok(false);
        };
        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, "job claimed");

        let Some(processor) = self.processors.get(job.job_type.as_str()) else {
            let message = format!("no processor registered for job type '{}'", job.job_type);
            self.db.fail_job(&job.id, &message)?;
            self.fire_on_failed(&job, &message);
            return Ok(true);
        };

        match processor.process(&job).await {
            Ok(result) => {
                self.db.complete_job(&job.id, result.as_ref())?;
                debug!(job_id = %job.id, "job completed");
            }
            Err(e) => {
                let message = e.to_string();
                self.settle_failure(&job, &message)?;
            }
        }
        Ok(true)
    }

    fn settle_failure(&self, job: &Job, message: &str) -> ScanResult<()> {
        let base = if is_rate_limit_message(message) {
            self.cfg.rate_limit_delay
        } else {
            self.cfg.base_delay
        };
        let delay = retry_delay(base, job.attempts);

        if job.attempts < job.max_retries {
            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = message,
                "job failed, re-queued with delay"
            );
            self.db
                .pause_job(&job.id, now_millis() + delay.as_millis() as i64)?;
        } else {
            self.db.fail_job(&job.id, message)?;
            self.fire_on_failed(job, message);
        }
        Ok(())
    }

    fn fire_on_failed(&self, job: &Job, message: &str) {
        if let Some(cb) = &self.on_job_failed {
            cb(job, message);
        }
    }
}

/// `base · 2^(attempts-1)`, saturating.
fn retry_delay(base: Duration, attempts: i64) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    base.saturating_mul(1u32 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::ScriptedBehaviour;
    use data_store::{JobStatus, NewJob};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker_with(db: Arc<Database>, behaviour: ScriptedBehaviour) -> Worker {
        let mut worker = Worker::new(db, WorkerConfig::default());
        worker.register(Processor::scripted(behaviour));
        worker
    }

    #[test]
    fn classifier_matches_provider_phrasings() {
        assert!(is_rate_limit_message("HTTP 429 from provider"));
        assert!(is_rate_limit_message("Rate limit exceeded, slow down"));
        assert!(is_rate_limit_message("ratelimit: try later"));
        assert!(is_rate_limit_message("request token limit reached"));
        assert!(is_rate_limit_message("enqueued past the daily limit"));
        assert!(!is_rate_limit_message("connection reset by peer"));
        assert!(!is_rate_limit_message("404 not found"));
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn empty_queue_returns_false() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let worker = worker_with(db, ScriptedBehaviour::Succeed);
        assert!(!worker.tick().await.unwrap());
    }

    #[tokio::test]
    async fn success_marks_job_done() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = db
            .enqueue_job(NewJob::new("scripted", json!({})))
            .unwrap();
        let worker = worker_with(db.clone(), ScriptedBehaviour::Succeed);

        assert!(worker.tick().await.unwrap());
        assert_eq!(db.get_job(&id).unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn failure_requeues_with_future_run_after() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = db
            .enqueue_job(NewJob::new("scripted", json!({})))
            .unwrap();
        let worker = worker_with(db.clone(), ScriptedBehaviour::Fail("transient outage"));

        let before = now_millis();
        worker.tick().await.unwrap();

        let job = db.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        let run_after = job.run_after.unwrap();
        assert!(run_after >= before + 1_000, "first retry waits at least base");
    }

    #[tokio::test]
    async fn rate_limited_failure_uses_extended_delay() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = db
            .enqueue_job(NewJob::new("scripted", json!({})))
            .unwrap();
        let worker = worker_with(db.clone(), ScriptedBehaviour::Fail("429 too many requests"));

        let before = now_millis();
        worker.tick().await.unwrap();

        let job = db.get_job(&id).unwrap();
        assert!(job.run_after.unwrap() >= before + 60_000);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_and_fire_callback() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = db
            .enqueue_job(NewJob {
                job_type: "scripted".into(),
                payload: json!({}),
                max_retries: 2,
                run_after: None,
            })
            .unwrap();

        static FIRED: AtomicUsize = AtomicUsize::new(0);
        let mut worker = worker_with(db.clone(), ScriptedBehaviour::Fail("boom"));
        worker.set_on_job_failed(Box::new(|_, _| {
            FIRED.fetch_add(1, Ordering::SeqCst);
        }));

        worker.tick().await.unwrap(); // attempt 1 → pause
        db.pause_job(&id, now_millis() - 1).unwrap(); // activate immediately
        worker.tick().await.unwrap(); // attempt 2 > max_retries → fail

        assert_eq!(db.get_job(&id).unwrap().status, JobStatus::Failed);
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_job_type_fails_permanently() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = db.enqueue_job(NewJob::new("mystery", json!({}))).unwrap();
        let worker = worker_with(db.clone(), ScriptedBehaviour::Succeed);

        worker.tick().await.unwrap();
        let job = db.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("no processor registered"));
    }
}
