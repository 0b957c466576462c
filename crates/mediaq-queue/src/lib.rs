//! In-memory job queue.
//!
//! This crate provides:
//! - Priority ordering of queued jobs with FIFO tie-breaking
//! - The table of active (queued and running) jobs
//! - A hard ceiling on waiting jobs

pub mod error;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig};
