//! Thin HTTP surface over the core operations.
//!
//! Routes exposed to the outer layer:
//!   * `GET  /health`                                  — liveness
//!   * `POST /api/scans`                               — enqueue a scan
//!   * `GET  /api/scans/{id}`                          — scan progress
//!   * `GET  /api/scans/{id}/groups`                   — dupe groups
//!   * `GET  /api/repos/{id}/prs/{number}/duplicates`  — one-PR lookup
//!
//! Authentication middleware is intentionally absent; callers identify
//! their account with its api key in the request itself.

pub mod core;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::core::app_state::AppState;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_route))
        .route("/api/scans", post(routes::scans::trigger_scan_route))
        .route("/api/scans/{id}", get(routes::scans::scan_progress_route))
        .route("/api/scans/{id}/groups", get(routes::groups::scan_groups_route))
        .route(
            "/api/repos/{repo_id}/prs/{number}/duplicates",
            get(routes::duplicates::pr_duplicates_route),
        )
        .with_state(state)
}

/// Serves the router until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
