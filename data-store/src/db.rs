//! Connection handling and schema.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    api_key     TEXT NOT NULL UNIQUE,
    label       TEXT,
    config      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS repos (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    owner        TEXT NOT NULL,
    name         TEXT NOT NULL,
    created_at   INTEGER NOT NULL,
    last_scan_at INTEGER,
    UNIQUE (owner, name)
);

CREATE TABLE IF NOT EXISTS prs (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id        INTEGER NOT NULL REFERENCES repos(id),
    number         INTEGER NOT NULL,
    title          TEXT NOT NULL,
    body           TEXT,
    author         TEXT NOT NULL,
    diff_hash      TEXT,
    file_paths     TEXT NOT NULL DEFAULT '[]',
    state          TEXT NOT NULL DEFAULT 'open',
    github_etag    TEXT,
    embed_hash     TEXT,
    intent_summary TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_prs_repo_number ON prs(repo_id, number);

CREATE TABLE IF NOT EXISTS scans (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id               INTEGER NOT NULL REFERENCES repos(id),
    account_id            INTEGER NOT NULL REFERENCES accounts(id),
    status                TEXT NOT NULL DEFAULT 'queued',
    phase_cursor          TEXT,
    input_tokens          INTEGER NOT NULL DEFAULT 0,
    output_tokens         INTEGER NOT NULL DEFAULT 0,
    token_usage_breakdown TEXT NOT NULL DEFAULT '{}',
    pr_count              INTEGER NOT NULL DEFAULT 0,
    dupe_group_count      INTEGER NOT NULL DEFAULT 0,
    error                 TEXT,
    started_at            INTEGER NOT NULL,
    completed_at          INTEGER
);

CREATE TABLE IF NOT EXISTS dupe_groups (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id      INTEGER NOT NULL REFERENCES scans(id),
    repo_id      INTEGER NOT NULL REFERENCES repos(id),
    label        TEXT NOT NULL,
    pr_count     INTEGER NOT NULL,
    confidence   REAL NOT NULL,
    relationship TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dupe_group_members (
    group_id  INTEGER NOT NULL REFERENCES dupe_groups(id),
    pr_id     INTEGER NOT NULL REFERENCES prs(id),
    rank      INTEGER NOT NULL,
    score     REAL NOT NULL,
    rationale TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (group_id, pr_id)
);

CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    type        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'queued',
    result      TEXT,
    error       TEXT,
    attempts    INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    run_after   INTEGER,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(status, run_after, created_at);

CREATE TABLE IF NOT EXISTS pairwise_cache (
    repo_id     INTEGER NOT NULL REFERENCES repos(id),
    pr_a        INTEGER NOT NULL,
    pr_b        INTEGER NOT NULL,
    hash_a      TEXT NOT NULL,
    hash_b      TEXT NOT NULL,
    result_json TEXT NOT NULL,
    PRIMARY KEY (repo_id, pr_a, pr_b, hash_a, hash_b)
);
CREATE INDEX IF NOT EXISTS idx_pairwise_repo_pair ON pairwise_cache(repo_id, pr_a, pr_b);
"#;

/// Handle over one embedded database.
///
/// Cheap to share behind an `Arc`; every DAO method locks the connection for
/// the duration of one short statement or transaction.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` with WAL mode and
    /// enforced foreign keys, and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` with the locked connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    /// Runs `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().expect("database mutex poisoned");
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Milliseconds since the epoch, the timestamp unit used across tables.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
