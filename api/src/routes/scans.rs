//! Scan trigger and progress routes.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Response,
};
use data_store::NewJob;
use scan_engine::{JOB_SCAN, ScanJobPayload};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::core::{app_state::AppState, http::response_envelope::ApiResponse};

#[derive(Debug, Deserialize)]
pub struct TriggerScanRequest {
    /// Account api key; authentication middleware is out of scope.
    pub api_key: String,
    pub repo_id: i64,
    #[serde(default)]
    pub max_prs: Option<usize>,
}

#[derive(Serialize)]
pub struct TriggerScanResponse {
    pub scan_id: i64,
    pub job_id: String,
}

/// Creates a scan row and enqueues the orchestrator job.
#[instrument(name = "trigger_scan_route", skip(state, body))]
pub async fn trigger_scan_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TriggerScanRequest>,
) -> Response {
    let account = match state.db.get_account_by_api_key(&body.api_key) {
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

    let repo = match state.db.get_repo(body.repo_id) {
        Ok(repo) => repo,
        Err(data_store::StoreError::NotFound { .. }) => {
            return ApiResponse::<()>::error_with_details(
                "NOT_FOUND",
                "Repository is not tracked.",
                serde_json::json!({
                    "path": "repo_id",
                    "hint": "Track the repository before scanning it.",
                }),
            )
            .into_response_with_status(StatusCode::NOT_FOUND);
        }
        Err(e) => return storage_error(e),
    };

    let scan_id = match state.db.create_scan(repo.id, account.id) {
        Ok(id) => id,
        Err(e) => return storage_error(e),
    };

    let payload = ScanJobPayload {
        scan_id,
        repo_id: repo.id,
        account_id: account.id,
        owner: repo.owner.clone(),
        repo: repo.name.clone(),
        max_prs: body.max_prs,
    };
    let job_id = match serde_json::to_value(&payload)
        .map_err(data_store::StoreError::from)
        .and_then(|p| state.db.enqueue_job(NewJob::new(JOB_SCAN, p)))
    {
        Ok(id) => id,
        Err(e) => return storage_error(e),
    };

    info!(scan_id, repo = format!("{}/{}", repo.owner, repo.name), "scan enqueued");
    ApiResponse::success(TriggerScanResponse { scan_id, job_id })
        .into_response_with_status(StatusCode::ACCEPTED)
}

#[derive(Serialize)]
pub struct ScanProgressResponse {
    pub scan_id: i64,
    pub status: String,
    pub waiting_on_provider_batch: bool,
    pub pr_count: i64,
    pub dupe_group_count: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub token_usage_breakdown: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

/// Read model for the UI's progress view.
#[instrument(name = "scan_progress_route", skip(state))]
pub async fn scan_progress_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.db.get_scan(id) {
        Ok(scan) => ApiResponse::success(ScanProgressResponse {
            scan_id: scan.id,
            status: scan.status.as_str().to_string(),
            waiting_on_provider_batch: scan.phase_cursor.is_some(),
            pr_count: scan.pr_count,
            dupe_group_count: scan.dupe_group_count,
            input_tokens: scan.input_tokens,
            output_tokens: scan.output_tokens,
            token_usage_breakdown: scan.token_usage_breakdown,
            error: scan.error,
            started_at: scan.started_at,
            completed_at: scan.completed_at,
        })
        .into_response_with_status(StatusCode::OK),
        Err(data_store::StoreError::NotFound { .. }) => ApiResponse::<()>::error_with_details(
            "NOT_FOUND",
            "No such scan.",
            serde_json::json!({ "path": "id" }),
        )
        .into_response_with_status(StatusCode::NOT_FOUND),
        Err(e) => storage_error(e),
    }
}

pub(crate) fn storage_error(e: data_store::StoreError) -> Response {
    ApiResponse::<()>::error("STORAGE_ERROR", e.to_string())
        .into_response_with_status(StatusCode::INTERNAL_SERVER_ERROR)
}
