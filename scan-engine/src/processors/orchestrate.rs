//! Scan orchestrator: head of the pipeline.
//!
//! Validates the scan and enqueues the `ingest` job; every later stage
//! enqueues its successor itself, which keeps a scan's stages strictly
//! serial while different scans interleave freely.

use std::sync::Arc;

use data_store::{Database, Job, NewJob};
use serde_json::{Value, json};
use tracing::info;

use crate::errors::{ScanError, ScanResult};
use crate::payloads::{JOB_INGEST, ScanJobPayload};

pub struct ScanOrchestrator {
    db: Arc<Database>,
}

impl ScanOrchestrator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn process(&self, job: &Job) -> ScanResult<Option<Value>> {
        let payload: ScanJobPayload = serde_json::from_value(job.payload.clone())?;

        let scan = self.db.get_scan(payload.scan_id)?;
        if scan.status.is_terminal() {
            return Err(ScanError::Config(format!(
                "scan {} already finished as {}",
                scan.id,
                scan.status.as_str()
            )));
        }

        let ingest_id = self.db.enqueue_job(NewJob::new(
            JOB_INGEST,
            serde_json::to_value(&payload)?,
        ))?;

        info!(
            scan_id = payload.scan_id,
            repo = format!("{}/{}", payload.owner, payload.repo),
            ingest_job = %ingest_id,
            "scan orchestrated"
        );
        Ok(Some(json!({ "ingest_job_id": ingest_id })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::test_support::seed_account;
    use data_store::JobStatus;

    #[tokio::test]
    async fn enqueues_ingest_with_same_payload() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let repo = db.create_repo("o", "r").unwrap();
        let account = seed_account(&db);
        let scan = db.create_scan(repo, account).unwrap();

        let payload = ScanJobPayload {
            scan_id: scan,
            repo_id: repo,
            account_id: account,
            owner: "o".into(),
            repo: "r".into(),
            max_prs: None,
        };
        let id = db
            .enqueue_job(NewJob::new("scan", serde_json::to_value(&payload).unwrap()))
            .unwrap();
        let job = db.dequeue_job().unwrap().unwrap();
        assert_eq!(job.id, id);

        let orchestrator = ScanOrchestrator::new(db.clone());
        orchestrator.process(&job).await.unwrap();

        let ingest = db.dequeue_job().unwrap().unwrap();
        assert_eq!(ingest.job_type, "ingest");
        assert_eq!(ingest.payload["scan_id"], scan);
        assert_eq!(ingest.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn finished_scan_is_rejected() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let repo = db.create_repo("o", "r").unwrap();
        let account = seed_account(&db);
        let scan = db.create_scan(repo, account).unwrap();
        db.fail_scan(scan, "earlier failure").unwrap();

        let payload = ScanJobPayload {
            scan_id: scan,
            repo_id: repo,
            account_id: account,
            owner: "o".into(),
            repo: "r".into(),
            max_prs: None,
        };
        db.enqueue_job(NewJob::new("scan", serde_json::to_value(&payload).unwrap()))
            .unwrap();
        let job = db.dequeue_job().unwrap().unwrap();

        let orchestrator = ScanOrchestrator::new(db.clone());
        assert!(orchestrator.process(&job).await.is_err());
    }
}
