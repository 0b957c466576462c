//! Shared data models for the mediaq job service.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their lifecycle states and failure details
//! - Processing parameters
//! - FFmpeg progress snapshots
//! - Job API request/response bodies

pub mod job;
pub mod params;
pub mod progress;
pub mod request;

pub use job::{Job, JobError, JobErrorKind, JobId, JobState};
pub use params::JobParams;
pub use progress::FfmpegProgress;
pub use request::{
    CancelJobResponse, JobStatusResponse, JobSummary, SubmitJobRequest, SubmitJobResponse,
};
