//! API error types.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use mediaq_queue::QueueError;
use mediaq_storage::StorageError;
use mediaq_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Set once at startup from the configured environment.
static HIDE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Hide internal error details from responses (production).
pub fn hide_internal_details(hide: bool) {
    HIDE_INTERNAL_DETAILS.store(hide, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Worker(e) => worker_status(e),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::BAD_REQUEST => "validation_error",
            StatusCode::CONFLICT => "conflict",
            StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
            StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
            _ => "internal_error",
        }
    }
}

fn worker_status(error: &WorkerError) -> StatusCode {
    match error {
        WorkerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        WorkerError::Queue(e) => match e {
            QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::QueueFull { .. } | QueueError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            QueueError::InvalidState(_) => StatusCode::CONFLICT,
        },
        WorkerError::Storage(e) => match e {
            StorageError::NotFound(_) | StorageError::ArtifactMissing(_) => StatusCode::NOT_FOUND,
            StorageError::NotReady(_) | StorageError::InvalidState(_) => StatusCode::CONFLICT,
            StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = %status, "Request failed: {}", self);
        }

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && HIDE_INTERNAL_DETAILS.load(Ordering::Relaxed)
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}
