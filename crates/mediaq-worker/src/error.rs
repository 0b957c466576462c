//! Worker error types.

use thiserror::Error;

use mediaq_queue::QueueError;
use mediaq_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkerError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    /// Whether the service is temporarily unable to take work.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_unavailable())
    }
}
