//! Pairwise verification cache.
//!
//! Keyed by `(repo_id, min(pr_a, pr_b), max(pr_a, pr_b), hash_a, hash_b)`
//! where the hashes are the two PRs' embed fingerprints at verification
//! time. An entry stops matching as soon as either side's fingerprint
//! changes, so stale verdicts are never reused.

use rusqlite::{OptionalExtension, params};
use serde_json::Value;

use crate::db::Database;
use crate::error::Result;

/// Normalises an unordered pair with its hashes into storage order.
fn ordered(
    pr_a: i64,
    pr_b: i64,
    hash_a: &str,
    hash_b: &str,
) -> (i64, i64, String, String) {
    if pr_a <= pr_b {
        (pr_a, pr_b, hash_a.to_string(), hash_b.to_string())
    } else {
        (pr_b, pr_a, hash_b.to_string(), hash_a.to_string())
    }
}

impl Database {
    /// Looks up a cached verification result for the pair at these hashes.
    pub fn get_pairwise_result(
        &self,
        repo_id: i64,
        pr_a: i64,
        pr_b: i64,
        hash_a: &str,
        hash_b: &str,
    ) -> Result<Option<Value>> {
        let (a, b, ha, hb) = ordered(pr_a, pr_b, hash_a, hash_b);
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT result_json FROM pairwise_cache
                     WHERE repo_id = ?1 AND pr_a = ?2 AND pr_b = ?3
                       AND hash_a = ?4 AND hash_b = ?5",
                    params![repo_id, a, b, ha, hb],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match raw {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            })
        })
    }

    /// Stores a verification result, replacing any entry for the same key.
    pub fn put_pairwise_result(
        &self,
        repo_id: i64,
        pr_a: i64,
        pr_b: i64,
        hash_a: &str,
        hash_b: &str,
        result: &Value,
    ) -> Result<()> {
        let (a, b, ha, hb) = ordered(pr_a, pr_b, hash_a, hash_b);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pairwise_cache
                     (repo_id, pr_a, pr_b, hash_a, hash_b, result_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![repo_id, a, b, ha, hb, result.to_string()],
            )?;
            Ok(())
        })
    }

    /// Drops stale entries of a pair regardless of hash (housekeeping when a
    /// PR's fingerprint changes).
    pub fn evict_pairwise_pair(&self, repo_id: i64, pr_a: i64, pr_b: i64) -> Result<usize> {
        let (a, b) = if pr_a <= pr_b { (pr_a, pr_b) } else { (pr_b, pr_a) };
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM pairwise_cache WHERE repo_id = ?1 AND pr_a = ?2 AND pr_b = ?3",
                params![repo_id, a, b],
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_is_order_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        let result = json!({"isDuplicate": true, "confidence": 0.9});

        db.put_pairwise_result(repo, 7, 3, "h7", "h3", &result).unwrap();

        let hit = db.get_pairwise_result(repo, 3, 7, "h3", "h7").unwrap();
        assert_eq!(hit.unwrap()["isDuplicate"], true);
        let hit = db.get_pairwise_result(repo, 7, 3, "h7", "h3").unwrap();
        assert!(hit.is_some());
    }

    #[test]
    fn hash_change_invalidates() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        db.put_pairwise_result(repo, 1, 2, "old-a", "h-b", &json!({"isDuplicate": false}))
            .unwrap();

        assert!(
            db.get_pairwise_result(repo, 1, 2, "new-a", "h-b")
                .unwrap()
                .is_none(),
            "entry must not match once one side's fingerprint moved"
        );
    }

    #[test]
    fn evict_drops_all_hash_variants() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        db.put_pairwise_result(repo, 1, 2, "a1", "b1", &json!({})).unwrap();
        db.put_pairwise_result(repo, 1, 2, "a2", "b2", &json!({})).unwrap();
        assert_eq!(db.evict_pairwise_pair(repo, 2, 1).unwrap(), 2);
    }
}
