//! Stored pull requests and their per-PR caches.
//!
//! `intent_summary` and `embed_hash` are the detect stage's checkpoints:
//! the summary is persisted as soon as it is extracted, and `embed_hash` is
//! written only after the corresponding vectors were upserted.

use rusqlite::{OptionalExtension, Row, params};

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::models::{Pr, PrUpsert};

impl Database {
    /// Inserts or updates a PR keyed by `(repo_id, number)`.
    ///
    /// Ingest-owned columns are replaced; the detect-stage caches
    /// (`embed_hash`, `intent_summary`) are left untouched so an unchanged
    /// diff keeps its valid vectors.
    pub fn upsert_pr(&self, pr: &PrUpsert) -> Result<i64> {
        let paths = serde_json::to_string(&pr.file_paths)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO prs (repo_id, number, title, body, author, diff_hash, file_paths,
                                  state, github_etag, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (repo_id, number) DO UPDATE SET
                     title = excluded.title,
                     body = excluded.body,
                     author = excluded.author,
                     diff_hash = excluded.diff_hash,
                     file_paths = excluded.file_paths,
                     state = excluded.state,
                     github_etag = excluded.github_etag,
                     created_at = excluded.created_at,
                     updated_at = excluded.updated_at",
                params![
                    pr.repo_id,
                    pr.number,
                    pr.title,
                    pr.body,
                    pr.author,
                    pr.diff_hash,
                    paths,
                    pr.state,
                    pr.github_etag,
                    pr.created_at,
                    pr.updated_at,
                ],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM prs WHERE repo_id = ?1 AND number = ?2",
                params![pr.repo_id, pr.number],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    pub fn get_pr(&self, repo_id: i64, number: i64) -> Result<Option<Pr>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{PR_SELECT} WHERE repo_id = ?1 AND number = ?2"),
                params![repo_id, number],
                pr_from_row,
            )
            .optional()?
            .transpose()
        })
    }

    pub fn get_pr_by_id(&self, id: i64) -> Result<Pr> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{PR_SELECT} WHERE id = ?1"), params![id], pr_from_row)
                .optional()?
                .transpose()?
                .ok_or(StoreError::NotFound {
                    entity: "pr",
                    key: id.to_string(),
                })
        })
    }

    /// All PRs of a repo, open ones first by number.
    pub fn list_prs(&self, repo_id: i64) -> Result<Vec<Pr>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{PR_SELECT} WHERE repo_id = ?1 ORDER BY number"))?;
            let rows = stmt.query_map(params![repo_id], pr_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .collect()
        })
    }

    /// PRs of a repo restricted to the given numbers (a scan's in-scope set).
    pub fn list_prs_by_numbers(&self, repo_id: i64, numbers: &[i64]) -> Result<Vec<Pr>> {
        let all = self.list_prs(repo_id)?;
        let wanted: std::collections::HashSet<i64> = numbers.iter().copied().collect();
        Ok(all.into_iter().filter(|p| wanted.contains(&p.number)).collect())
    }

    /// Persists an extracted intent summary (phase checkpoint).
    pub fn set_pr_intent_summary(&self, pr_id: i64, summary: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE prs SET intent_summary = ?2 WHERE id = ?1",
                params![pr_id, summary],
            )?;
            Ok(())
        })
    }

    /// Invalidates both detect-stage caches together.
    ///
    /// Called when a PR's fingerprint moved since the last embed: the old
    /// summary and vectors belong to the previous content.
    pub fn clear_pr_caches(&self, pr_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE prs SET embed_hash = NULL, intent_summary = NULL WHERE id = ?1",
                params![pr_id],
            )?;
            Ok(())
        })
    }

    /// Marks the PR's vectors as current for `embed_hash`.
    ///
    /// Written only after the vector upsert succeeded; never swap that order.
    pub fn set_pr_embed_hash(&self, pr_id: i64, embed_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE prs SET embed_hash = ?2 WHERE id = ?1",
                params![pr_id, embed_hash],
            )?;
            Ok(())
        })
    }
}

const PR_SELECT: &str = "SELECT id, repo_id, number, title, body, author, diff_hash, file_paths,
       state, github_etag, embed_hash, intent_summary, created_at, updated_at FROM prs";

fn pr_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Pr>> {
    let paths_json: String = row.get(7)?;
    Ok(match serde_json::from_str(&paths_json) {
        Ok(file_paths) => Ok(Pr {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            number: row.get(2)?,
            title: row.get(3)?,
            body: row.get(4)?,
            author: row.get(5)?,
            diff_hash: row.get(6)?,
            file_paths,
            state: row.get(8)?,
            github_etag: row.get(9)?,
            embed_hash: row.get(10)?,
            intent_summary: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        }),
        Err(e) => Err(StoreError::Json(e)),
    })
}
