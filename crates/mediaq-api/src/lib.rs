//! Axum HTTP API for the media job service.
//!
//! This crate provides:
//! - Configuration loading from a mounted directory
//! - Job submission, status, cancellation and result download
//! - Health, readiness and Prometheus endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ConfigError, ServiceConfig};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
