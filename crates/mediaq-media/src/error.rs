//! Error types for tool execution.

use std::path::PathBuf;
use thiserror::Error;

use mediaq_models::{JobError, JobErrorKind};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running the media tool.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Tool could not be executed ({}): {message}", .path.display())]
    ExecutionFailed { path: PathBuf, message: String },

    #[error("Tool timed out after {secs} seconds")]
    Timeout { secs: u64, stderr: String },

    #[error("Tool exited with {}", describe_exit(.exit_code))]
    NonZeroExit {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("non-zero status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

impl MediaError {
    /// Create an execution failure error.
    pub fn execution_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// Convert into the error detail recorded on a failed job.
    pub fn to_job_error(&self) -> JobError {
        match self {
            MediaError::ExecutionFailed { .. } => {
                JobError::new(JobErrorKind::ExecutionError, self.to_string())
            }
            MediaError::Timeout { stderr, .. } => {
                JobError::new(JobErrorKind::TimeoutError, self.to_string()).with_stderr(stderr.clone())
            }
            MediaError::NonZeroExit { exit_code, stderr } => {
                JobError::new(JobErrorKind::NonZeroExitError, self.to_string())
                    .with_exit_code(*exit_code)
                    .with_stderr(stderr.clone())
            }
            MediaError::Cancelled => JobError::new(JobErrorKind::Cancelled, self.to_string()),
            MediaError::Io(_) | MediaError::Internal(_) => JobError::internal(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_kinds() {
        let err = MediaError::execution_failed("/nope/ffmpeg", "not found");
        assert_eq!(err.to_job_error().kind, JobErrorKind::ExecutionError);

        let err = MediaError::Timeout {
            secs: 3,
            stderr: String::new(),
        };
        let job_err = err.to_job_error();
        assert_eq!(job_err.kind, JobErrorKind::TimeoutError);
        assert!(job_err.stderr.is_none());

        let err = MediaError::NonZeroExit {
            exit_code: Some(1),
            stderr: "Invalid data found".to_string(),
        };
        let job_err = err.to_job_error();
        assert_eq!(job_err.kind, JobErrorKind::NonZeroExitError);
        assert_eq!(job_err.exit_code, Some(1));
        assert_eq!(job_err.stderr.as_deref(), Some("Invalid data found"));
    }

    #[test]
    fn test_non_zero_exit_message() {
        let err = MediaError::NonZeroExit {
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }
}
