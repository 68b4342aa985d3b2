//! One-off duplicate lookup for a single PR.
//!
//! Serves the "find duplicates for this PR" query of the HTTP layer. When
//! the PR is already stored with current vectors, those are reused;
//! otherwise it is fetched from GitHub and embedded on the fly (without
//! persisting anything).

use std::collections::HashMap;
use std::sync::Arc;

use data_store::Database;
use serde::Serialize;
use tracing::info;
use vector_store::repo_filter;

use crate::errors::{ScanError, ScanResult};
use crate::prompts::{PrSummary, intent_messages};
use crate::resolve::{Services, resolve_services};

/// One similar PR, best space score wins.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateHit {
    pub pr_number: i64,
    pub score: f32,
    /// `code` or `intent` — the space that produced the better score.
    pub space: &'static str,
}

/// Finds likely duplicates of `number` within its repository.
pub async fn find_duplicates_for_pr(
    db: &Arc<Database>,
    account_id: i64,
    owner: &str,
    repo: &str,
    number: i64,
    top_k: usize,
) -> ScanResult<Vec<DuplicateHit>> {
    let account = db.get_account(account_id)?;
    let services = resolve_services(&account)?;

    let repo_row = db
        .get_repo_by_name(owner, repo)?
        .ok_or_else(|| ScanError::Config(format!("repository {owner}/{repo} is not tracked")))?;

    let (code_vec, intent_vec) = resolve_query_vectors(db, &services, repo_row.id, owner, repo, number).await?;

    let limit = (top_k * 2) as u64;
    let mut best: HashMap<i64, (f32, &'static str)> = HashMap::new();
    for (collection, vector, space) in [
        ("code", code_vec, "code"),
        ("intent", intent_vec, "intent"),
    ] {
        let hits = services
            .vectors
            .search(collection, vector, limit, Some(repo_filter(repo_row.id)))
            .await?;
        for hit in hits {
            let Some(n) = hit.payload.get("pr_number").and_then(|v| v.as_i64()) else {
                continue;
            };
            if n == number {
                continue;
            }
            let entry = best.entry(n).or_insert((hit.score, space));
            if hit.score > entry.0 {
                *entry = (hit.score, space);
            }
        }
    }

    let mut out: Vec<DuplicateHit> = best
        .into_iter()
        .map(|(pr_number, (score, space))| DuplicateHit { pr_number, score, space })
        .collect();
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(top_k);

    info!(owner, repo, number, hits = out.len(), "duplicate lookup complete");
    Ok(out)
}

/// Query vectors for the PR: stored ones when current, otherwise computed
/// on the fly from a fresh GitHub fetch.
async fn resolve_query_vectors(
    db: &Arc<Database>,
    services: &Services,
    repo_id: i64,
    owner: &str,
    repo: &str,
    number: i64,
) -> ScanResult<(Vec<f32>, Vec<f32>)> {
    if db.get_pr(repo_id, number)?.is_some() {
        let code = services
            .vectors
            .get_vector("code", &format!("{repo_id}-{number}-code"))
            .await?;
        let intent = services
            .vectors
            .get_vector("intent", &format!("{repo_id}-{number}-intent"))
            .await?;
        if let (Some(code), Some(intent)) = (code, intent) {
            return Ok((code, intent));
        }
    }

    // Not stored (or vectors missing): fetch and embed transiently.
    let pr = services.github.fetch_pr(owner, repo, number).await?;
    let files = services.github.get_pr_files(owner, repo, number).await?;
    let file_paths: Vec<String> = files.into_iter().map(|f| f.path).collect();

    let summary = PrSummary {
        number,
        title: pr.title.clone(),
        body: pr.body.clone(),
        file_paths: file_paths.clone(),
    };
    let intent_text = services
        .chat
        .chat(&intent_messages(&summary))
        .await?
        .content;

    let code_input = format!("{}\n{}", pr.title, file_paths.join("\n"));
    let (vectors, _usage) = services
        .embedding
        .embed(&[code_input, intent_text])
        .await?;
    let mut it = vectors.into_iter();
    match (it.next(), it.next()) {
        (Some(code), Some(intent)) => Ok((code, intent)),
        _ => Err(ScanError::InvalidModelOutput(
            "embedding provider returned too few vectors".into(),
        )),
    }
}
