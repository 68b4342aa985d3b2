//! Row models shared by the DAO modules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Tracked repository.
#[derive(Debug, Clone, Serialize)]
pub struct Repo {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub created_at: i64,
    pub last_scan_at: Option<i64>,
}

/// Stored pull request row.
#[derive(Debug, Clone, Serialize)]
pub struct Pr {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    /// Digest of the normalised diff; `None` when the diff was oversized.
    pub diff_hash: Option<String>,
    pub file_paths: Vec<String>,
    pub state: String,
    pub github_etag: Option<String>,
    /// Fingerprint last used to produce vectors; `None` until first embed.
    pub embed_hash: Option<String>,
    pub intent_summary: Option<String>,
    /// GitHub timestamps (RFC 3339).
    pub created_at: String,
    pub updated_at: String,
}

/// Fields written by the ingest stage when upserting a PR.
#[derive(Debug, Clone)]
pub struct PrUpsert {
    pub repo_id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub diff_hash: Option<String>,
    pub file_paths: Vec<String>,
    pub state: String,
    pub github_etag: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Scan lifecycle states.
///
/// `queued → ingesting → embedding → verifying → ranking → done`; any
/// non-terminal state may move to `failed`. `paused` is representable but
/// never produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Ingesting,
    Embedding,
    Verifying,
    Ranking,
    Done,
    Failed,
    Paused,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Ingesting => "ingesting",
            ScanStatus::Embedding => "embedding",
            ScanStatus::Verifying => "verifying",
            ScanStatus::Ranking => "ranking",
            ScanStatus::Done => "done",
            ScanStatus::Failed => "failed",
            ScanStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "queued" => Ok(ScanStatus::Queued),
            "ingesting" => Ok(ScanStatus::Ingesting),
            "embedding" => Ok(ScanStatus::Embedding),
            "verifying" => Ok(ScanStatus::Verifying),
            "ranking" => Ok(ScanStatus::Ranking),
            "done" => Ok(ScanStatus::Done),
            "failed" => Ok(ScanStatus::Failed),
            "paused" => Ok(ScanStatus::Paused),
            other => Err(StoreError::CorruptColumn {
                column: "scans.status",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Done | ScanStatus::Failed)
    }

    /// Whether a write `from -> to` is legal.
    ///
    /// Retried jobs legitimately move backwards between working states
    /// (e.g. `verifying -> embedding` on a re-run), so the machine only
    /// forbids leaving terminal states and entering `done` from anywhere
    /// but `ranking`.
    pub fn can_transition(from: ScanStatus, to: ScanStatus) -> bool {
        if from.is_terminal() {
            return false;
        }
        match to {
            ScanStatus::Done => from == ScanStatus::Ranking,
            _ => true,
        }
    }
}

/// Scan row.
#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub id: i64,
    pub repo_id: i64,
    pub account_id: i64,
    pub status: ScanStatus,
    /// Opaque resume blob for async provider batches.
    pub phase_cursor: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub token_usage_breakdown: Value,
    pub pr_count: i64,
    pub dupe_group_count: i64,
    pub error: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

/// Confirmed duplicate group.
#[derive(Debug, Clone, Serialize)]
pub struct DupeGroup {
    pub id: i64,
    pub scan_id: i64,
    pub repo_id: i64,
    pub label: String,
    pub pr_count: i64,
    pub confidence: f64,
    pub relationship: String,
}

/// Ranked member of a duplicate group; rank 1 is the recommended PR.
#[derive(Debug, Clone, Serialize)]
pub struct DupeGroupMember {
    pub group_id: i64,
    pub pr_id: i64,
    pub rank: i64,
    pub score: f64,
    pub rationale: String,
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::CorruptColumn {
                column: "jobs.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Queue job row.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: Value,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: i64,
    pub max_retries: i64,
    pub run_after: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        assert!(!ScanStatus::can_transition(ScanStatus::Done, ScanStatus::Ingesting));
        assert!(!ScanStatus::can_transition(ScanStatus::Failed, ScanStatus::Queued));
    }

    #[test]
    fn done_only_from_ranking() {
        assert!(ScanStatus::can_transition(ScanStatus::Ranking, ScanStatus::Done));
        assert!(!ScanStatus::can_transition(ScanStatus::Embedding, ScanStatus::Done));
    }

    #[test]
    fn retries_may_move_backwards() {
        assert!(ScanStatus::can_transition(
            ScanStatus::Verifying,
            ScanStatus::Embedding
        ));
    }
}
