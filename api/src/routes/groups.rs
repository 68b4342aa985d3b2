//! Dupe-group listing route.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use tracing::instrument;

use crate::core::{app_state::AppState, http::response_envelope::ApiResponse};
use crate::routes::scans::storage_error;

/// Lists a scan's duplicate groups with ranked members.
#[instrument(name = "scan_groups_route", skip(state))]
pub async fn scan_groups_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    // Surface a 404 for unknown scans rather than an empty list.
    if let Err(e) = state.db.get_scan(id) {
        return match e {
            data_store::StoreError::NotFound { .. } => ApiResponse::<()>::error_with_details(
                "NOT_FOUND",
                "No such scan.",
                serde_json::json!({ "path": "id" }),
            )
            .into_response_with_status(StatusCode::NOT_FOUND),
            other => storage_error(other),
        };
    }

    match state.db.list_scan_groups(id) {
        Ok(groups) => {
            ApiResponse::success(groups).into_response_with_status(StatusCode::OK)
        }
        Err(e) => storage_error(e),
    }
}
