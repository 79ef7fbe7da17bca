// databasebackup/src/server/mod.rs
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backup::{BackupOutcome, BackupRunner};

const DEFAULT_REASON: &str = "Manual";

#[derive(Clone)]
pub struct ServerState {
    pub runner: Arc<BackupRunner>,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct StartBackupParams {
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupsCompleted {
    message: String,
    backups: Vec<BackupOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupsFailed {
    message: String,
    results: Vec<BackupOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health() -> &'static str {
    "OK"
}

async fn start_backup(
    State(state): State<ServerState>,
    Query(params): Query<StartBackupParams>,
) -> Response {
    let reason = params
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_REASON.to_string());
    info!("Backup requested over HTTP (reason: {})", reason);

    // the run lives on its own task so a client disconnect cannot abort it
    let runner = Arc::clone(&state.runner);
    let cancel = state.shutdown.child_token();
    let run = tokio::spawn(async move { runner.run_backup(&reason, &cancel).await });
    let report = match run.await {
        Ok(report) => report,
        Err(join_error) => {
            error!(error = %join_error, "HTTP-triggered backup task failed");
            let body = BackupsFailed {
                message: "Some backups failed.".to_string(),
                results: Vec::new(),
                error: Some(format!("Unexpected system error during backup: {}", join_error)),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    if report.all_succeeded() {
        let body = BackupsCompleted {
            message: "All backups completed successfully.".to_string(),
            backups: report.outcomes,
        };
        (StatusCode::OK, Json(body)).into_response()
    } else {
        warn!(
            "HTTP-triggered backup finished with {} failures",
            report.failed_count()
        );
        let body = BackupsFailed {
            message: "Some backups failed.".to_string(),
            results: report.outcomes,
            error: report.system_error,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/api/backup/start", post(start_backup))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves the trigger API until the shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!("HTTP trigger listening on {}", local_addr);

    axum::serve(listener, make_app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("HTTP trigger stopped");
    Ok(())
}
