//! Structured job logging utilities.
//!
//! Every lifecycle event carries the job id and the tool invocation
//! context so a single job can be followed through the logs.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use mediaq_models::{Job, JobError, JobId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    input: String,
}

impl JobLogger {
    /// Create a logger for a job.
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            input: job.input.clone(),
        }
    }

    /// Create a logger from a bare job id.
    pub fn from_id(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
            input: String::new(),
        }
    }

    pub fn log_queued(&self, priority: i32, queued: usize) {
        info!(
            job_id = %self.job_id,
            input = %self.input,
            priority,
            queued,
            "Job queued"
        );
    }

    pub fn log_start(&self, running: usize) {
        info!(
            job_id = %self.job_id,
            input = %self.input,
            running,
            "Job started"
        );
    }

    pub fn log_progress(&self, out_time: &str, speed: f64) {
        tracing::debug!(
            job_id = %self.job_id,
            out_time,
            speed,
            "Job progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    pub fn log_failure(&self, error: &JobError) {
        error!(
            job_id = %self.job_id,
            kind = %error.kind,
            exit_code = ?error.exit_code,
            "Job failed: {}", error.message
        );
    }

    pub fn log_retry(&self, attempt: u32, max_retries: u32, delay: Duration, error: &JobError) {
        warn!(
            job_id = %self.job_id,
            attempt,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            kind = %error.kind,
            "Attempt failed, retrying: {}", error.message
        );
    }

    pub fn log_cancelled(&self, was_running: bool) {
        info!(job_id = %self.job_id, was_running, "Job cancelled");
    }

    pub fn log_completion(&self, duration_ms: u64, output_ref: Option<&str>) {
        info!(
            job_id = %self.job_id,
            duration_ms,
            output = output_ref.unwrap_or("none"),
            "Job succeeded"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span wrapping the job's execution task.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_models::JobParams;

    #[test]
    fn test_job_logger_creation() {
        let job = Job::new("/in/a.mp4", JobParams::default());
        let logger = JobLogger::new(&job);
        assert_eq!(logger.job_id(), job.id.as_str());
    }

    #[test]
    fn test_job_logger_from_id() {
        let id = JobId::from_string("job-123");
        assert_eq!(JobLogger::from_id(&id).job_id(), "job-123");
    }
}
