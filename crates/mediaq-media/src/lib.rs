//! FFmpeg CLI wrapper for job execution.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeout and cancellation with guaranteed process reaping
//! - Atomic publication of finished artifacts

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod progress;
pub mod runner;

pub use command::{check_tool, FfmpegCommand, FfmpegRunner, ProcessResult};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use runner::{JobOutput, ProcessRunner, RunnerConfig};
