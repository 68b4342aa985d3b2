//! Duplicate groups and their ranked members.
//!
//! Groups are only ever written as a whole: the ranking phase replaces a
//! scan's groups in one transaction so readers never observe a half-written
//! result set.

use rusqlite::{Row, params};

use crate::db::Database;
use crate::error::Result;
use crate::models::{DupeGroup, DupeGroupMember};

/// A group ready for persistence.
#[derive(Debug, Clone)]
pub struct NewDupeGroup {
    pub label: String,
    pub confidence: f64,
    pub relationship: String,
    /// Ordered by rank ascending; rank 1 first.
    pub members: Vec<NewGroupMember>,
}

#[derive(Debug, Clone)]
pub struct NewGroupMember {
    pub pr_id: i64,
    pub rank: i64,
    pub score: f64,
    pub rationale: String,
}

/// A stored group joined with its members, ordered by rank.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DupeGroupWithMembers {
    #[serde(flatten)]
    pub group: DupeGroup,
    pub members: Vec<DupeGroupMember>,
}

impl Database {
    /// Replaces all groups of a scan transactionally and updates the scan's
    /// group counter.
    pub fn replace_scan_groups(
        &self,
        scan_id: i64,
        repo_id: i64,
        groups: &[NewDupeGroup],
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM dupe_group_members WHERE group_id IN
                     (SELECT id FROM dupe_groups WHERE scan_id = ?1)",
                params![scan_id],
            )?;
            tx.execute("DELETE FROM dupe_groups WHERE scan_id = ?1", params![scan_id])?;

            for group in groups {
                tx.execute(
                    "INSERT INTO dupe_groups (scan_id, repo_id, label, pr_count, confidence, relationship)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        scan_id,
                        repo_id,
                        group.label,
                        group.members.len() as i64,
                        group.confidence,
                        group.relationship,
                    ],
                )?;
                let group_id = tx.last_insert_rowid();
                for member in &group.members {
                    tx.execute(
                        "INSERT INTO dupe_group_members (group_id, pr_id, rank, score, rationale)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![group_id, member.pr_id, member.rank, member.score, member.rationale],
                    )?;
                }
            }

            tx.execute(
                "UPDATE scans SET dupe_group_count = ?2 WHERE id = ?1",
                params![scan_id, groups.len() as i64],
            )?;
            Ok(())
        })
    }

    /// All groups of a scan with members ordered by rank.
    pub fn list_scan_groups(&self, scan_id: i64) -> Result<Vec<DupeGroupWithMembers>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, scan_id, repo_id, label, pr_count, confidence, relationship
                 FROM dupe_groups WHERE scan_id = ?1 ORDER BY confidence DESC, id",
            )?;
            let groups = stmt
                .query_map(params![scan_id], group_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut member_stmt = conn.prepare(
                "SELECT group_id, pr_id, rank, score, rationale
                 FROM dupe_group_members WHERE group_id = ?1 ORDER BY rank",
            )?;

            let mut out = Vec::with_capacity(groups.len());
            for group in groups {
                let members = member_stmt
                    .query_map(params![group.id], member_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                out.push(DupeGroupWithMembers { group, members });
            }
            Ok(out)
        })
    }
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<DupeGroup> {
    Ok(DupeGroup {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        repo_id: row.get(2)?,
        label: row.get(3)?,
        pr_count: row.get(4)?,
        confidence: row.get(5)?,
        relationship: row.get(6)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<DupeGroupMember> {
    Ok(DupeGroupMember {
        group_id: row.get(0)?,
        pr_id: row.get(1)?,
        rank: row.get(2)?,
        score: row.get(3)?,
        rationale: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::tests_support::sample_account;
    use crate::models::PrUpsert;

    fn setup() -> (Database, i64, i64, Vec<i64>) {
        let db = Database::open_in_memory().unwrap();
        let repo = db.create_repo("o", "r").unwrap();
        let account = sample_account(&db);
        let scan = db.create_scan(repo, account).unwrap();
        let mut pr_ids = Vec::new();
        for n in 1..=4 {
            pr_ids.push(
                db.upsert_pr(&PrUpsert {
                    repo_id: repo,
                    number: n,
                    title: format!("pr {n}"),
                    body: None,
                    author: "a".into(),
                    diff_hash: None,
                    file_paths: vec![],
                    state: "open".into(),
                    github_etag: None,
                    created_at: "2026-01-01T00:00:00Z".into(),
                    updated_at: "2026-01-01T00:00:00Z".into(),
                })
                .unwrap(),
            );
        }
        (db, repo, scan, pr_ids)
    }

    fn group(prs: &[i64]) -> NewDupeGroup {
        NewDupeGroup {
            label: "auth fix duplicates".into(),
            confidence: 0.9,
            relationship: "near_duplicate".into(),
            members: prs
                .iter()
                .enumerate()
                .map(|(i, &pr_id)| NewGroupMember {
                    pr_id,
                    rank: i as i64 + 1,
                    score: 90.0 - i as f64,
                    rationale: "r".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn replace_is_atomic_and_updates_count() {
        let (db, repo, scan, pr_ids) = setup();

        db.replace_scan_groups(scan, repo, &[group(&pr_ids[0..2])]).unwrap();
        assert_eq!(db.get_scan(scan).unwrap().dupe_group_count, 1);

        // Second replacement wipes the first result set.
        db.replace_scan_groups(scan, repo, &[group(&pr_ids[0..3]), group(&pr_ids[3..4])])
            .unwrap();
        let groups = db.list_scan_groups(scan).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.len() + groups[1].members.len(), 4);
        assert_eq!(db.get_scan(scan).unwrap().dupe_group_count, 2);
    }

    #[test]
    fn members_come_back_rank_ordered() {
        let (db, repo, scan, pr_ids) = setup();
        db.replace_scan_groups(scan, repo, &[group(&pr_ids)]).unwrap();
        let groups = db.list_scan_groups(scan).unwrap();
        let ranks: Vec<i64> = groups[0].members.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }
}
