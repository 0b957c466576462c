//! Result storage for finished jobs.
//!
//! This crate provides:
//! - O(1) lookup of terminal jobs by id
//! - Time-based retention with a background sweeper
//! - Artifact resolution and deletion

pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{content_type_for, Artifact, ResultStore, StoreConfig};
