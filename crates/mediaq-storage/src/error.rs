//! Storage error types.

use mediaq_models::JobState;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Result not found: {0}")]
    NotFound(String),

    #[error("Job has no result yet (state: {0})")]
    NotReady(JobState),

    #[error("Artifact not available: {0}")]
    ArtifactMissing(String),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn artifact_missing(msg: impl Into<String>) -> Self {
        Self::ArtifactMissing(msg.into())
    }
}
