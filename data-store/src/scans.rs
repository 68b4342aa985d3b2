//! Scan rows and the status state machine.

use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use crate::db::{Database, now_millis};
use crate::error::{Result, StoreError};
use crate::models::{Scan, ScanStatus};

impl Database {
    /// Creates a scan in `queued`.
    pub fn create_scan(&self, repo_id: i64, account_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scans (repo_id, account_id, status, started_at)
                 VALUES (?1, ?2, 'queued', ?3)",
                params![repo_id, account_id, now_millis()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_scan(&self, id: i64) -> Result<Scan> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{SCAN_SELECT} WHERE id = ?1"),
                params![id],
                scan_from_row,
            )
            .optional()?
            .transpose()?
            .ok_or(StoreError::NotFound {
                entity: "scan",
                key: id.to_string(),
            })
        })
    }

    pub fn list_scans_for_repo(&self, repo_id: i64) -> Result<Vec<Scan>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SCAN_SELECT} WHERE repo_id = ?1 ORDER BY started_at DESC"
            ))?;
            let rows = stmt.query_map(params![repo_id], scan_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .collect()
        })
    }

    /// Writes a status, validating the transition against the current row.
    pub fn set_scan_status(&self, id: i64, to: ScanStatus) -> Result<()> {
        self.with_tx(|tx| {
            let current: String = tx
                .query_row("SELECT status FROM scans WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?
                .ok_or(StoreError::NotFound {
                    entity: "scan",
                    key: id.to_string(),
                })?;
            let from = ScanStatus::parse(&current)?;
            if !ScanStatus::can_transition(from, to) {
                return Err(StoreError::InvalidTransition {
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                });
            }
            tx.execute(
                "UPDATE scans SET status = ?2 WHERE id = ?1",
                params![id, to.as_str()],
            )?;
            Ok(())
        })
    }

    /// Sets or clears the async-batch resume token.
    pub fn set_scan_phase_cursor(&self, id: i64, cursor: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE scans SET phase_cursor = ?2 WHERE id = ?1",
                params![id, cursor],
            )?;
            Ok(())
        })
    }

    pub fn set_scan_pr_count(&self, id: i64, pr_count: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE scans SET pr_count = ?2 WHERE id = ?1",
                params![id, pr_count],
            )?;
            Ok(())
        })
    }

    /// Accumulates token usage under a named phase in the breakdown blob.
    pub fn add_scan_token_usage(
        &self,
        id: i64,
        phase: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<()> {
        self.with_tx(|tx| {
            let raw: String = tx
                .query_row(
                    "SELECT token_usage_breakdown FROM scans WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound {
                    entity: "scan",
                    key: id.to_string(),
                })?;
            let mut breakdown: Value = serde_json::from_str(&raw)?;
            let obj = breakdown
                .as_object_mut()
                .ok_or_else(|| StoreError::CorruptColumn {
                    column: "scans.token_usage_breakdown",
                    value: raw.clone(),
                })?;
            let entry = obj
                .entry(phase.to_string())
                .or_insert_with(|| serde_json::json!({"input_tokens": 0, "output_tokens": 0}));
            entry["input_tokens"] =
                Value::from(entry["input_tokens"].as_i64().unwrap_or(0) + input_tokens);
            entry["output_tokens"] =
                Value::from(entry["output_tokens"].as_i64().unwrap_or(0) + output_tokens);

            tx.execute(
                "UPDATE scans SET
                     token_usage_breakdown = ?2,
                     input_tokens = input_tokens + ?3,
                     output_tokens = output_tokens + ?4
                 WHERE id = ?1",
                params![id, breakdown.to_string(), input_tokens, output_tokens],
            )?;
            Ok(())
        })
    }

    /// Terminal success: `ranking -> done` with a completion timestamp.
    pub fn finish_scan(&self, id: i64) -> Result<()> {
        self.set_scan_status(id, ScanStatus::Done)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE scans SET completed_at = ?2, error = NULL WHERE id = ?1",
                params![id, now_millis()],
            )?;
            Ok(())
        })
    }

    /// Terminal failure with an operator-visible error string.
    ///
    /// Failing an already-terminal scan is a no-op so the worker's
    /// on-job-failed hook can fire unconditionally.
    pub fn fail_scan(&self, id: i64, error: &str) -> Result<()> {
        self.with_tx(|tx| {
            let current: Option<String> = tx
                .query_row("SELECT status FROM scans WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?;
            let Some(current) = current else {
                return Ok(());
            };
            if ScanStatus::parse(&current)?.is_terminal() {
                return Ok(());
            }
            tx.execute(
                "UPDATE scans SET status = 'failed', error = ?2, completed_at = ?3 WHERE id = ?1",
                params![id, error, now_millis()],
            )?;
            Ok(())
        })
    }
}

const SCAN_SELECT: &str = "SELECT id, repo_id, account_id, status, phase_cursor, input_tokens,
       output_tokens, token_usage_breakdown, pr_count, dupe_group_count, error,
       started_at, completed_at FROM scans";

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Scan>> {
    let status_raw: String = row.get(3)?;
    let breakdown_raw: String = row.get(7)?;
    Ok((|| {
        Ok(Scan {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            account_id: row.get(2)?,
            status: ScanStatus::parse(&status_raw)?,
            phase_cursor: row.get(4)?,
            input_tokens: row.get(5)?,
            output_tokens: row.get(6)?,
            token_usage_breakdown: serde_json::from_str(&breakdown_raw)?,
            pr_count: row.get(8)?,
            dupe_group_count: row.get(9)?,
            error: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::tests_support::sample_account;

    #[test]
    fn status_walk_through_pipeline() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        let account = sample_account(&db);
        let scan = db.create_scan(repo, account).unwrap();

        for status in [
            ScanStatus::Ingesting,
            ScanStatus::Embedding,
            ScanStatus::Verifying,
            ScanStatus::Ranking,
        ] {
            db.set_scan_status(scan, status).unwrap();
        }
        db.finish_scan(scan).unwrap();

        let row = db.get_scan(scan).unwrap();
        assert_eq!(row.status, ScanStatus::Done);
        assert!(row.completed_at.is_some());

        // Terminal states are sticky.
        assert!(db.set_scan_status(scan, ScanStatus::Ingesting).is_err());
    }

    #[test]
    fn done_requires_ranking() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        let account = sample_account(&db);
        let scan = db.create_scan(repo, account).unwrap();
        db.set_scan_status(scan, ScanStatus::Ingesting).unwrap();
        assert!(matches!(
            db.set_scan_status(scan, ScanStatus::Done),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn token_usage_accumulates_per_phase() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        let account = sample_account(&db);
        let scan = db.create_scan(repo, account).unwrap();

        db.add_scan_token_usage(scan, "intent", 100, 20).unwrap();
        db.add_scan_token_usage(scan, "intent", 50, 5).unwrap();
        db.add_scan_token_usage(scan, "verify", 30, 10).unwrap();

        let row = db.get_scan(scan).unwrap();
        assert_eq!(row.input_tokens, 180);
        assert_eq!(row.output_tokens, 35);
        assert_eq!(row.token_usage_breakdown["intent"]["input_tokens"], 150);
        assert_eq!(row.token_usage_breakdown["verify"]["output_tokens"], 10);
    }

    #[test]
    fn fail_scan_is_idempotent_and_sticky() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        let account = sample_account(&db);
        let scan = db.create_scan(repo, account).unwrap();

        db.fail_scan(scan, "boom").unwrap();
        db.fail_scan(scan, "boom again").unwrap();

        let row = db.get_scan(scan).unwrap();
        assert_eq!(row.status, ScanStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("boom"));
    }
}
