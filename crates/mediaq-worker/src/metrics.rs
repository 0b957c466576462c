//! Job metrics.

use metrics::{counter, gauge, histogram};

use mediaq_models::JobState;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "mediaq_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "mediaq_jobs_rejected_total";
    pub const JOBS_FINISHED_TOTAL: &str = "mediaq_jobs_finished_total";
    pub const JOBS_RETRIED_TOTAL: &str = "mediaq_jobs_retried_total";
    pub const JOBS_QUEUED: &str = "mediaq_jobs_queued";
    pub const JOBS_RUNNING: &str = "mediaq_jobs_running";
    pub const TOOL_DURATION_SECONDS: &str = "mediaq_tool_duration_seconds";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_rejected(reason: &'static str) {
    counter!(names::JOBS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Count a job reaching a terminal state.
pub fn record_job_finished(state: JobState, error_kind: Option<&'static str>) {
    let labels = [
        ("state", state.as_str().to_string()),
        ("kind", error_kind.unwrap_or("none").to_string()),
    ];
    counter!(names::JOBS_FINISHED_TOTAL, &labels).increment(1);
}

pub fn record_job_retried(error_kind: &'static str) {
    counter!(names::JOBS_RETRIED_TOTAL, "kind" => error_kind).increment(1);
}

pub fn set_job_counts(queued: usize, running: usize) {
    gauge!(names::JOBS_QUEUED).set(queued as f64);
    gauge!(names::JOBS_RUNNING).set(running as f64);
}

pub fn record_tool_duration(duration_secs: f64) {
    histogram!(names::TOOL_DURATION_SECONDS).record(duration_secs);
}
