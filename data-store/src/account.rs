//! Accounts: provider configuration and thresholds, one row per tenant.
//!
//! The `config` column stores an [`AccountConfig`] JSON blob; every scan
//! references an account so one worker process can serve multiple tenants
//! with different providers and keys.

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::db::{Database, now_millis};
use crate::error::{Result, StoreError};

/// Account row with its parsed configuration.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub api_key: String,
    pub label: Option<String>,
    pub config: AccountConfig,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Provider configuration and scan thresholds for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub github: GithubSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub vector_store: VectorStoreSettings,
    #[serde(default)]
    pub scan: ScanSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSettings {
    pub token: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// `openai` or `ollama`.
    pub provider: String,
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Whether the async batch protocol may be used.
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub max_context_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub batch: bool,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Detection thresholds, all defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_candidate_threshold")]
    pub candidate_threshold: f32,
    #[serde(default = "default_max_candidates")]
    pub max_candidates_per_pr: usize,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    /// Per-space overrides of `candidate_threshold`.
    #[serde(default)]
    pub code_similarity_threshold: Option<f32>,
    #[serde(default)]
    pub intent_similarity_threshold: Option<f32>,
}

impl ScanSettings {
    /// Effective threshold for the `code` vector space.
    pub fn code_threshold(&self) -> f32 {
        self.code_similarity_threshold.unwrap_or(self.candidate_threshold)
    }

    /// Effective threshold for the `intent` vector space.
    pub fn intent_threshold(&self) -> f32 {
        self.intent_similarity_threshold.unwrap_or(self.candidate_threshold)
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            candidate_threshold: default_candidate_threshold(),
            max_candidates_per_pr: default_max_candidates(),
            max_group_size: default_max_group_size(),
            code_similarity_threshold: None,
            intent_similarity_threshold: None,
        }
    }
}

fn default_candidate_threshold() -> f32 {
    0.65
}

fn default_max_candidates() -> usize {
    15
}

fn default_max_group_size() -> usize {
    50
}

impl Database {
    /// Creates an account; the api key must be unique.
    pub fn create_account(
        &self,
        api_key: &str,
        label: Option<&str>,
        config: &AccountConfig,
    ) -> Result<i64> {
        let now = now_millis();
        let json = serde_json::to_string(config)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (api_key, label, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![api_key, label, json, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_account(&self, id: i64) -> Result<Account> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, api_key, label, config, created_at, updated_at
                 FROM accounts WHERE id = ?1",
                params![id],
                account_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "account",
                key: id.to_string(),
            })?
        })
    }

    pub fn get_account_by_api_key(&self, api_key: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, api_key, label, config, created_at, updated_at
                 FROM accounts WHERE api_key = ?1",
                params![api_key],
                account_from_row,
            )
            .optional()?
            .transpose()
        })
    }

    /// Replaces the stored configuration.
    pub fn update_account_config(&self, id: i64, config: &AccountConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET config = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, json, now_millis()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "account",
                    key: id.to_string(),
                });
            }
            Ok(())
        })
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Account>> {
    let config_json: String = row.get(3)?;
    Ok(match serde_json::from_str(&config_json) {
        Ok(config) => Ok(Account {
            id: row.get(0)?,
            api_key: row.get(1)?,
            label: row.get(2)?,
            config,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        }),
        Err(e) => Err(StoreError::Json(e)),
    })
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub fn sample_config() -> AccountConfig {
        serde_json::from_value(serde_json::json!({
            "github": {"token": "ghp_test"},
            "llm": {"provider": "openai", "url": "https://api.openai.com", "model": "gpt-4o-mini", "api_key": "sk-x", "batch": true},
            "embedding": {"provider": "openai", "url": "https://api.openai.com", "model": "text-embedding-3-small", "api_key": "sk-x", "dimensions": 1536},
            "vector_store": {"url": "http://localhost:6334"}
        }))
        .unwrap()
    }

    pub fn sample_account(db: &Database) -> i64 {
        db.create_account("key-test", None, &sample_config()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::sample_config;
    use super::*;

    #[test]
    fn scan_settings_default_when_absent() {
        let cfg = sample_config();
        assert_eq!(cfg.scan.candidate_threshold, 0.65);
        assert_eq!(cfg.scan.max_candidates_per_pr, 15);
        assert_eq!(cfg.scan.max_group_size, 50);
        assert_eq!(cfg.github.api_base, "https://api.github.com");
    }

    #[test]
    fn account_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .create_account("key-1", Some("main"), &sample_config())
            .unwrap();
        let account = db.get_account(id).unwrap();
        assert_eq!(account.api_key, "key-1");
        assert_eq!(account.config.embedding.dimensions, 1536);

        let by_key = db.get_account_by_api_key("key-1").unwrap().unwrap();
        assert_eq!(by_key.id, id);
        assert!(db.get_account_by_api_key("missing").unwrap().is_none());
    }
}
