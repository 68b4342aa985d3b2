//! One-PR duplicate lookup route.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use scan_engine::lookup::find_duplicates_for_pr;
use serde::Deserialize;
use tracing::instrument;

use crate::core::{app_state::AppState, http::response_envelope::ApiResponse};
use crate::routes::scans::storage_error;

#[derive(Debug, Deserialize)]
pub struct DuplicatesQuery {
    pub api_key: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

/// Finds likely duplicates for one PR, embedding it on the fly when it is
/// not yet in the local store.
#[instrument(name = "pr_duplicates_route", skip(state, query))]
pub async fn pr_duplicates_route(
    State(state): State<Arc<AppState>>,
    Path((repo_id, number)): Path<(i64, i64)>,
    Query(query): Query<DuplicatesQuery>,
) -> Response {
    let account = match state.db.get_account_by_api_key(&query.api_key) {
        Ok(Some(account)) => account,
        Ok(None) => {
            return ApiResponse::<()>::error_with_details(
                "UNAUTHORIZED",
                "Unknown api key.",
                serde_json::json!({
                    "path": "api_key",
                    "hint": "No account is registered under this key.",
                }),
            )
            .into_response_with_status(StatusCode::UNAUTHORIZED);
        }
        Err(e) => return storage_error(e),
    };

    let repo = match state.db.get_repo(repo_id) {
        Ok(repo) => repo,
        Err(data_store::StoreError::NotFound { .. }) => {
            return ApiResponse::<()>::error_with_details(
                "NOT_FOUND",
                "Repository is not tracked.",
                serde_json::json!({
                    "path": "repo_id",
                    "hint": "Track the repository before querying it.",
                }),
            )
            .into_response_with_status(StatusCode::NOT_FOUND);
        }
        Err(e) => return storage_error(e),
    };

    match find_duplicates_for_pr(
        &state.db,
        account.id,
        &repo.owner,
        &repo.name,
        number,
        query.top_k,
    )
    .await
    {
        Ok(hits) => ApiResponse::success(hits).into_response_with_status(StatusCode::OK),
        Err(e) => ApiResponse::<()>::error("LOOKUP_FAILED", e.to_string())
            .into_response_with_status(StatusCode::BAD_GATEWAY),
    }
}
