//! Process entry point: database, worker loop and HTTP server.
//!
//! Environment inputs: `DATABASE_PATH`, `PORT`, `LOG_LEVEL`.
//! SIGTERM/SIGINT trigger graceful shutdown: the HTTP server stops
//! accepting, the worker loop stops at its next tick boundary and the
//! database closes on drop. Jobs left `running` by a hard kill are
//! recovered into `queued` at the next startup.

use std::sync::Arc;

use anyhow::Context;
use api::core::app_state::AppState;
use data_store::Database;
use scan_engine::payloads::scan_id_of;
use scan_engine::processors::{DetectProcessor, IngestProcessor, ScanOrchestrator};
use scan_engine::{Processor, Worker, WorkerConfig};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional .env for local development.
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "pr_dedup.db".into());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .context("PORT must be a number")?;

    let db = Arc::new(Database::open(&db_path)?);
    db.recover_running_jobs()?;

    let mut worker = Worker::new(db.clone(), WorkerConfig::default());
    worker.register(Processor::Orchestrate(ScanOrchestrator::new(db.clone())));
    worker.register(Processor::Ingest(IngestProcessor::new(db.clone())));
    worker.register(Processor::Detect(DetectProcessor::new(db.clone())));

    // Mirror permanent job failures onto the owning scan so UI state stays
    // consistent with the queue.
    let failure_db = db.clone();
    worker.set_on_job_failed(Box::new(move |job, message| {
        if let Some(scan_id) = scan_id_of(&job.payload) {
            if let Err(e) = failure_db.fail_scan(scan_id, message) {
                warn!(scan_id, error = %e, "failed to mark scan as failed");
            }
        }
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let state = Arc::new(AppState::new(db));
    api::serve(state, port, shutdown_signal()).await?;

    info!("http server stopped, stopping worker");
    let _ = shutdown_tx.send(true);
    worker_task.await.context("worker task panicked")?;
    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
