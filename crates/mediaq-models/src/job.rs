//! Job definitions and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::params::JobParams;
use crate::progress::FfmpegProgress;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a free execution slot
    #[default]
    Queued,
    /// Tool subprocess is running
    Running,
    /// Tool exited successfully
    Succeeded,
    /// Tool failed, timed out, or could not be started
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// Queued may only move to Running or Cancelled, Running only to a
    /// terminal state, and terminal states never move.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Queued => matches!(next, JobState::Running | JobState::Cancelled),
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The tool binary is missing or could not be spawned
    ExecutionError,
    /// The tool exceeded the configured timeout and was killed
    TimeoutError,
    /// The tool exited with a failure status
    NonZeroExitError,
    /// The job was cancelled while running
    Cancelled,
    /// The execution task itself failed (panic, I/O on artifacts)
    InternalError,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::ExecutionError => "execution_error",
            JobErrorKind::TimeoutError => "timeout_error",
            JobErrorKind::NonZeroExitError => "non_zero_exit_error",
            JobErrorKind::Cancelled => "cancelled",
            JobErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error detail recorded on a job that did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Tail of the tool's stderr, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            stderr: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        if !stderr.is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InternalError, message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One unit of submitted processing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Input path or URI handed to the tool
    pub input: String,
    pub params: JobParams,
    /// Higher runs first; ties broken by submission order
    #[serde(default)]
    pub priority: i32,
    pub state: JobState,
    /// Tool invocations started, retries included
    #[serde(default)]
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Location of the produced artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall-clock runtime of the tool in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<FfmpegProgress>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(input: impl Into<String>, params: JobParams) -> Self {
        Self {
            id: JobId::new(),
            input: input.into(),
            params,
            priority: 0,
            state: JobState::Queued,
            attempts: 0,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_ref: None,
            error: None,
            exit_code: None,
            duration_ms: None,
            progress: None,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a state transition if it is legal. Returns false otherwise.
    fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Queued -> Running.
    pub fn mark_running(&mut self) -> bool {
        let ok = self.transition(JobState::Running);
        if ok {
            self.started_at = Some(Utc::now());
            self.attempts = 1;
        }
        ok
    }

    /// Start another invocation of a running job. Progress of the failed
    /// attempt is discarded.
    pub fn begin_retry(&mut self) -> bool {
        if self.state != JobState::Running {
            return false;
        }
        self.attempts += 1;
        self.progress = None;
        true
    }

    /// Running -> Succeeded.
    pub fn mark_succeeded(&mut self, output_ref: Option<String>) -> bool {
        let ok = self.transition(JobState::Succeeded);
        if ok {
            self.output_ref = output_ref;
            if let Some(progress) = self.progress.as_mut() {
                progress.is_complete = true;
            }
        }
        ok
    }

    /// Running -> Failed.
    pub fn mark_failed(&mut self, error: JobError) -> bool {
        let ok = self.transition(JobState::Failed);
        if ok {
            if self.exit_code.is_none() {
                self.exit_code = error.exit_code;
            }
            self.error = Some(error);
        }
        ok
    }

    /// Queued or Running -> Cancelled.
    pub fn mark_cancelled(&mut self) -> bool {
        let was_running = self.state == JobState::Running;
        let ok = self.transition(JobState::Cancelled);
        if ok && was_running {
            self.error = Some(JobError::new(
                JobErrorKind::Cancelled,
                "Job cancelled while running",
            ));
        }
        ok
    }

    /// Record a progress snapshot. Ignored once the job is terminal.
    pub fn set_progress(&mut self, progress: FfmpegProgress) {
        if self.state == JobState::Running {
            self.progress = Some(progress);
        }
    }
}
