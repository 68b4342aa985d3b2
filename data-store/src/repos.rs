//! Tracked repositories.

use rusqlite::{OptionalExtension, Row, params};

use crate::db::{Database, now_millis};
use crate::error::{Result, StoreError};
use crate::models::Repo;

impl Database {
    /// Tracks a repository; `(owner, name)` is unique.
    pub fn create_repo(&self, owner: &str, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO repos (owner, name, created_at) VALUES (?1, ?2, ?3)",
                params![owner, name, now_millis()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_repo(&self, id: i64) -> Result<Repo> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, owner, name, created_at, last_scan_at FROM repos WHERE id = ?1",
                params![id],
                repo_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "repo",
                key: id.to_string(),
            })
        })
    }

    pub fn get_repo_by_name(&self, owner: &str, name: &str) -> Result<Option<Repo>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, owner, name, created_at, last_scan_at
                     FROM repos WHERE owner = ?1 AND name = ?2",
                    params![owner, name],
                    repo_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_repos(&self) -> Result<Vec<Repo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner, name, created_at, last_scan_at FROM repos ORDER BY id",
            )?;
            let rows = stmt.query_map([], repo_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn touch_repo_last_scan(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE repos SET last_scan_at = ?2 WHERE id = ?1",
                params![id, now_millis()],
            )?;
            Ok(())
        })
    }
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        last_scan_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_unique_by_owner_name() {
        let db = Database::open_in_memory().unwrap();
        db.create_repo("octo", "dupes").unwrap();
        assert!(db.create_repo("octo", "dupes").is_err());
        assert!(db.create_repo("octo", "other").is_ok());
    }

    #[test]
    fn lookup_by_name() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_repo("octo", "dupes").unwrap();
        let found = db.get_repo_by_name("octo", "dupes").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(db.get_repo_by_name("octo", "nope").unwrap().is_none());
    }
}
