//! Ingest processor: pulls PR metadata and diffs into the local store.
//!
//! Per-PR work runs in a bounded pool of 10 (the GitHub client's own
//! semaphore caps outbound concurrency below that). A PR whose GitHub
//! `updated_at` matches the stored row is skipped entirely but still counts
//! toward the scan. Oversized diffs degrade to a paths-only upsert with a
//! null diff hash; 304 responses keep the prior hash.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use data_store::{Database, Job, NewJob, PrUpsert, ScanStatus};
use detect_core::hash_diff;
use futures::stream::{self, StreamExt};
use github_client::{GitHubClient, GitHubError, PullRequest};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::errors::ScanResult;
use crate::payloads::{DetectJobPayload, JOB_DETECT, ScanJobPayload};
use crate::resolve::resolve_services;

/// Bounded fan-out for per-PR fetches.
const PR_POOL_SIZE: usize = 10;

pub struct IngestProcessor {
    db: Arc<Database>,
}

/// Ingest progress counters, reported via the logger.
#[derive(Default)]
struct Counters {
    skipped: AtomicUsize,
    etag_hits: AtomicUsize,
    diff_too_large: AtomicUsize,
    completed: AtomicUsize,
}

impl IngestProcessor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn process(&self, job: &Job) -> ScanResult<Option<Value>> {
        let payload: ScanJobPayload = serde_json::from_value(job.payload.clone())?;
        self.db.set_scan_status(payload.scan_id, ScanStatus::Ingesting)?;

        let account = self.db.get_account(payload.account_id)?;
        let services = resolve_services(&account)?;

        let prs = services
            .github
            .list_open_prs(&payload.owner, &payload.repo, payload.max_prs)
            .await?;
        let pr_numbers: Vec<i64> = prs.iter().map(|p| p.number).collect();

        let counters = Counters::default();
        let results: Vec<ScanResult<()>> = stream::iter(prs)
            .map(|pr| self.ingest_one(&payload, &services.github, pr, &counters))
            .buffer_unordered(PR_POOL_SIZE)
            .collect()
            .await;
        for result in results {
            result?;
        }

        self.db.set_scan_pr_count(payload.scan_id, pr_numbers.len() as i64)?;

        info!(
            scan_id = payload.scan_id,
            total = pr_numbers.len(),
            skipped = counters.skipped.load(Ordering::Relaxed),
            etag_hits = counters.etag_hits.load(Ordering::Relaxed),
            diff_too_large = counters.diff_too_large.load(Ordering::Relaxed),
            completed = counters.completed.load(Ordering::Relaxed),
            "ingest finished"
        );

        let detect = DetectJobPayload {
            scan: payload.clone(),
            pr_numbers: pr_numbers.clone(),
        };
        self.db
            .enqueue_job(NewJob::new(JOB_DETECT, serde_json::to_value(&detect)?))?;

        Ok(Some(json!({ "pr_count": pr_numbers.len() })))
    }

    /// Fetches and upserts one PR; cheap when nothing changed.
    async fn ingest_one(
        &self,
        payload: &ScanJobPayload,
        github: &GitHubClient,
        pr: PullRequest,
        counters: &Counters,
    ) -> ScanResult<()> {
        let existing = self.db.get_pr(payload.repo_id, pr.number)?;

        let pr_updated_at = pr.updated_at.to_rfc3339();
        if let Some(stored) = &existing {
            if stored.updated_at == pr_updated_at {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(number = pr.number, "pr unchanged, skipped");
                return Ok(());
            }
        }

        let etag = existing.as_ref().and_then(|p| p.github_etag.clone());
        let (files_result, diff_result) = tokio::join!(
            github.get_pr_files(&payload.owner, &payload.repo, pr.number),
            github.get_pr_diff(&payload.owner, &payload.repo, pr.number, etag.as_deref()),
        );

        // A PR that vanished between listing and fetch is skipped, not fatal.
        let files = match files_result {
            Ok(files) => files,
            Err(GitHubError::NotFound(url)) => {
                warn!(number = pr.number, %url, "pr disappeared during ingest, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let file_paths: Vec<String> = files.into_iter().map(|f| f.path).collect();

        // Diff outcomes: fresh body, 304 (keep prior hash), or oversized
        // (paths only, null hash).
        let (diff_hash, new_etag) = match diff_result {
            Ok(Some(diff)) => (Some(hash_diff(&diff.body)), diff.etag.or(etag)),
            Ok(None) => {
                counters.etag_hits.fetch_add(1, Ordering::Relaxed);
                (existing.as_ref().and_then(|p| p.diff_hash.clone()), etag)
            }
            Err(GitHubError::DiffTooLarge { bytes, limit }) => {
                counters.diff_too_large.fetch_add(1, Ordering::Relaxed);
                warn!(number = pr.number, bytes, limit, "diff too large, storing paths only");
                (None, None)
            }
            Err(GitHubError::NotFound(url)) => {
                warn!(number = pr.number, %url, "pr disappeared during ingest, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.db.upsert_pr(&PrUpsert {
            repo_id: payload.repo_id,
            number: pr.number,
            title: pr.title,
            body: pr.body,
            author: pr.author,
            diff_hash,
            file_paths,
            state: pr.state,
            github_etag: new_etag,
            created_at: pr.created_at.to_rfc3339(),
            updated_at: pr_updated_at,
        })?;

        counters.completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
