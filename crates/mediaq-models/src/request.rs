//! Request and response bodies for the job API.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobError, JobState};
use crate::params::JobParams;
use crate::progress::FfmpegProgress;

/// Maximum length of an input reference.
pub const MAX_INPUT_LENGTH: usize = 4096;

/// Remote URI schemes the tool is allowed to open directly.
const REMOTE_SCHEMES: &[&str] = &["http", "https"];

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitJobRequest {
    /// Input path or URI
    pub input: String,
    #[serde(default)]
    pub params: JobParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

impl SubmitJobRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            params: JobParams::default(),
            priority: None,
        }
    }

    pub fn with_params(mut self, params: JobParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Validate the request.
    ///
    /// Inputs are absolute paths, `file:///` URIs or `http(s)://` URIs.
    /// `allowed_extensions` restricts local inputs to the given lower-case
    /// extensions; an empty slice allows any.
    pub fn validate(&self, allowed_extensions: &[String]) -> Result<(), String> {
        let input = self.input.trim();
        if input.is_empty() {
            return Err("input is required".to_string());
        }
        if self.input.len() > MAX_INPUT_LENGTH {
            return Err(format!("input exceeds {} characters", MAX_INPUT_LENGTH));
        }
        if self.input.contains('\0') || self.input.starts_with('-') {
            return Err("input is not a valid path or URI".to_string());
        }

        // Anything not anchored at `/` could be read by the tool as a
        // protocol prefix (`concat:`, `subfile,,...:`)
        let local_path = match self.input.split_once("://") {
            Some(("file", path)) if path.starts_with('/') => Some(path),
            Some((scheme, _)) if REMOTE_SCHEMES.contains(&scheme) => None,
            Some(_) => return Err("input URI scheme is not supported".to_string()),
            None if self.input.starts_with('/') => Some(self.input.as_str()),
            None => return Err("input must be an absolute path or a supported URI".to_string()),
        };

        if let Some(path) = local_path {
            if !allowed_extensions.is_empty() {
                let extension = std::path::Path::new(path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase());
                match extension {
                    Some(ext) if allowed_extensions.iter().any(|a| a == &ext) => {}
                    _ => {
                        return Err(format!(
                            "input extension not allowed (allowed: {})",
                            allowed_extensions.join(", ")
                        ))
                    }
                }
            }
        }

        self.params.validate()
    }

    /// Build the queued job described by this request.
    pub fn into_job(self) -> Job {
        Job::new(self.input, self.params).with_priority(self.priority.unwrap_or(0))
    }
}

/// Response from `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub state: JobState,
}

/// Response from `GET /jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub state: JobState,
    pub input: String,
    pub priority: i32,
    pub attempts: u32,
    pub submitted_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<FfmpegProgress>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state,
            input: job.input.clone(),
            priority: job.priority,
            attempts: job.attempts,
            submitted_at: job.submitted_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            output_ref: job.output_ref.clone(),
            error: job.error.clone(),
            exit_code: job.exit_code,
            duration_ms: job.duration_ms,
            progress: job.progress.clone(),
        }
    }
}

/// Response from `DELETE /jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    /// Whether a cancellation was applied or requested
    pub cancelled: bool,
    pub state: JobState,
}

/// Entry in the `GET /jobs` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub state: JobState,
    pub priority: i32,
    pub submitted_at: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state,
            priority: job.priority,
            submitted_at: job.submitted_at.to_rfc3339(),
        }
    }
}
