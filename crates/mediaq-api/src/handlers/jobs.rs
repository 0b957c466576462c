//! Job handlers.
//!
//! Thin adapters between HTTP and the scheduler; no processing happens here.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use mediaq_models::{
    CancelJobResponse, JobId, JobStatusResponse, JobSummary, SubmitJobRequest, SubmitJobResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response from `GET /jobs`.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
}

fn rejection_error(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation(rejection.body_text())
    }
}

/// `POST /jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(request) = payload.map_err(rejection_error)?;
    request
        .validate(&state.config.allowed_input_extensions)
        .map_err(ApiError::validation)?;

    let job_id = state.scheduler.submit(request).await?;
    let job = state.scheduler.status(&job_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job_id.to_string(),
            state: job.state,
        }),
    ))
}

/// `GET /jobs`
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs: Vec<JobSummary> = state
        .scheduler
        .list()
        .await
        .iter()
        .map(JobSummary::from)
        .collect();

    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

/// `GET /jobs/:job_id`
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.scheduler.status(&JobId::from_string(job_id)).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// `DELETE /jobs/:job_id`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let job_id = JobId::from_string(job_id);
    let outcome = state.scheduler.cancel(&job_id).await?;

    if outcome.cancelled {
        info!(job_id = %job_id, state = %outcome.state, "Cancel requested via API");
    }

    Ok(Json(CancelJobResponse {
        job_id: job_id.to_string(),
        cancelled: outcome.cancelled,
        state: outcome.state,
    }))
}

/// `GET /jobs/:job_id/result`
///
/// Streams the artifact of a succeeded job.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let artifact = state
        .scheduler
        .artifact(&JobId::from_string(job_id))
        .await?;

    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ApiError::not_found("Artifact not found"),
            _ => ApiError::internal(format!("Failed to open artifact: {}", e)),
        })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type)
        .header(header::CONTENT_LENGTH, artifact.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.file_name),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// `DELETE /jobs/:job_id/result`
pub async fn delete_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    let job = state
        .scheduler
        .delete_result(&JobId::from_string(job_id))
        .await?;
    info!(job_id = %job.id, "Job result deleted");
    Ok(StatusCode::NO_CONTENT)
}
