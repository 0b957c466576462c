//! Job scheduling for the media service.
//!
//! This crate provides:
//! - Admission control bounded by `max_concurrent_jobs`
//! - Priority/FIFO dispatch onto the process runner
//! - Retries of transient tool failures
//! - Cooperative cancellation and shutdown drain
//! - Structured job lifecycle logging

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod scheduler;

pub use config::{RetryPolicy, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use scheduler::{CancelOutcome, Scheduler, SchedulerStats};
