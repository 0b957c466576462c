//! mediaq service binary.
//!
//! Usage: `mediaq [CONFIG_DIR]`. The directory falls back to
//! `MEDIAQ_CONFIG_DIR`, then `/etc/mediaq`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mediaq_api::config::config_dir;
use mediaq_api::{create_router, metrics, AppState, ServiceConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting mediaq {}", env!("CARGO_PKG_VERSION"));

    let dir = config_dir(
        std::env::args().nth(1),
        std::env::var("MEDIAQ_CONFIG_DIR").ok(),
    );
    info!("Loading configuration from {}", dir.display());

    // Invalid configuration must never reach the point of accepting jobs
    let config = ServiceConfig::load(&dir).context("Invalid configuration")?;
    config
        .prepare_dirs()
        .await
        .context("Invalid configuration")?;

    info!(
        host = %config.host,
        port = config.port,
        max_concurrent_jobs = config.max_concurrent_jobs,
        job_timeout_secs = config.job_timeout.as_secs(),
        tool = %config.tool_path.display(),
        artifact_dir = %config.artifact_dir.display(),
        "Configuration loaded"
    );

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder, metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr()))?;

    let state = AppState::new(config);
    let scheduler = state.scheduler.clone();

    let (sweeper_tx, sweeper_rx) = watch::channel(false);
    let sweeper = Arc::clone(state.store()).spawn_sweeper(sweeper_rx);

    let app = create_router(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, draining jobs");
    scheduler.shutdown().await;

    let _ = sweeper_tx.send(true);
    if let Err(e) = sweeper.await {
        warn!("Result sweeper ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers, falling back to Ctrl+C: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
    }
}
