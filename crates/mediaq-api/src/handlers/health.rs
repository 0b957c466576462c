//! Health check handlers.

use std::path::Path;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
    pub jobs: JobCounts,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub scheduler: CheckStatus,
    pub tool: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub retained: usize,
    pub max_concurrent: usize,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Write and remove a marker file.
async fn check_writable(dir: &Path) -> CheckStatus {
    let start = Instant::now();
    let marker = dir.join(format!(".ready-{}", Uuid::new_v4()));
    match tokio::fs::write(&marker, b"").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&marker).await;
            CheckStatus::ok(Some(start.elapsed().as_millis() as u64))
        }
        Err(e) => CheckStatus::error(format!("{}: {}", dir.display(), e)),
    }
}

/// Readiness check endpoint.
/// Checks that jobs are accepted, the tool is present and artifacts can be written.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let stats = state.scheduler.stats().await;

    let scheduler_check = if stats.accepting {
        CheckStatus::ok(None)
    } else {
        CheckStatus::error("shutting down")
    };

    let tool_check = if state.scheduler.runner().tool_available() {
        CheckStatus::ok(None)
    } else {
        CheckStatus::error(format!(
            "{} is not an executable file",
            state.config.tool_path.display()
        ))
    };

    let storage_check = check_writable(&state.config.artifact_dir).await;

    let all_ok = scheduler_check.is_ok() && tool_check.is_ok() && storage_check.is_ok();

    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            scheduler: scheduler_check,
            tool: tool_check,
            storage: storage_check,
        },
        jobs: JobCounts {
            queued: stats.queued,
            running: stats.running,
            retained: stats.retained,
            max_concurrent: stats.max_concurrent_jobs,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
