//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue is full ({limit} jobs waiting)")]
    QueueFull { limit: usize },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Invalid job state: {0}")]
    InvalidState(String),
}

impl QueueError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether retrying later could succeed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. } | QueueError::ShuttingDown)
    }
}
