//! Provider-agnostic shapes returned by the GitHub client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pull request metadata as consumed by the ingest stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    /// `open`, `closed`; merged PRs report `closed` plus `merged_at`.
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// One changed file within a PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrFile {
    pub path: String,
    /// `added`, `removed`, `modified`, `renamed`.
    pub status: String,
    pub additions: i64,
    pub deletions: i64,
}

/// Raw unified diff of a PR plus the ETag it was served under.
#[derive(Debug, Clone)]
pub struct PrDiff {
    pub body: String,
    pub etag: Option<String>,
}
