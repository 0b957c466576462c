//! Service configuration.
//!
//! Loaded once at startup from a mounted directory. Every `.toml`,
//! `.yaml`/`.yml` and `.json` file is merged in lexicographic file-name
//! order, later files overriding earlier keys, then `MEDIAQ_*` environment
//! variables override the merged values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use mediaq_media::{check_tool, RunnerConfig};
use mediaq_queue::QueueConfig;
use mediaq_storage::StoreConfig;
use mediaq_worker::{RetryPolicy, WorkerConfig};

/// Directory used when neither an argument nor `MEDIAQ_CONFIG_DIR` is given.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/mediaq";

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: i64 = 10;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MEDIAQ";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read configuration directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Missing required configuration key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Cannot create {}: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }
}

/// Validated service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Maximum number of tool processes running at once
    pub max_concurrent_jobs: usize,
    /// Per-job tool timeout
    pub job_timeout: Duration,
    /// Absolute path of the tool executable
    pub tool_path: PathBuf,
    /// Arguments placed before the generated ones
    pub tool_args: Vec<String>,
    /// Where finished artifacts live
    pub artifact_dir: PathBuf,
    /// Scratch area the tool writes into
    pub work_dir: PathBuf,
    /// Ceiling on waiting jobs
    pub max_queued_jobs: usize,
    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// How long finished jobs stay retrievable
    pub result_retention: Duration,
    pub retention_sweep_interval: Duration,
    /// Drain period at shutdown
    pub shutdown_timeout: Duration,
    /// Extra attempts for execution and timeout failures
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Accepted local input extensions; empty accepts any
    pub allowed_input_extensions: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Environment (development/production)
    pub environment: String,
    pub metrics_enabled: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let artifact_dir = PathBuf::from("/var/lib/mediaq/artifacts");
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600),
            tool_path: PathBuf::from("/usr/bin/ffmpeg"),
            tool_args: Vec::new(),
            work_dir: artifact_dir.join(".work"),
            artifact_dir,
            max_queued_jobs: 1000,
            kill_grace: Duration::from_secs(5),
            result_retention: Duration::from_secs(86400),
            retention_sweep_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::from_secs(5),
            allowed_input_extensions: Vec::new(),
            max_body_size: 1024 * 1024, // 1MB
            cors_origins: vec!["*".to_string()],
            environment: "development".to_string(),
            metrics_enabled: true,
        }
    }
}

/// Keys as they appear in the merged sources.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    max_concurrent_jobs: Option<i64>,
    job_timeout_seconds: Option<i64>,
    tool_path: Option<String>,
    host: Option<String>,
    port: Option<i64>,
    artifact_dir: Option<String>,
    work_dir: Option<String>,
    tool_args: Option<Vec<String>>,
    max_queued_jobs: Option<i64>,
    kill_grace_seconds: Option<i64>,
    result_retention_seconds: Option<i64>,
    retention_sweep_seconds: Option<i64>,
    shutdown_timeout_seconds: Option<i64>,
    max_retries: Option<i64>,
    retry_delay_seconds: Option<i64>,
    allowed_input_extensions: Option<Vec<String>>,
    max_body_size: Option<i64>,
    cors_origins: Option<Vec<String>>,
    environment: Option<String>,
    metrics_enabled: Option<bool>,
}

impl ServiceConfig {
    /// Load and validate the configuration in `dir`, applying `MEDIAQ_*`
    /// environment overrides.
    pub fn load(dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let env = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("tool_args")
            .with_list_parse_key("allowed_input_extensions")
            .with_list_parse_key("cors_origins");
        Self::load_with(dir.as_ref(), Some(env))
    }

    /// Load from the directory only.
    pub fn load_files(dir: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::load_with(dir.as_ref(), None)
    }

    fn load_with(dir: &Path, env: Option<Environment>) -> ConfigResult<Self> {
        let mut builder = Config::builder();
        for (path, format) in config_files(dir)? {
            debug!("Loading configuration file {}", path.display());
            builder = builder.add_source(File::from(path.as_path()).format(format).required(true));
        }
        if let Some(env) = env {
            builder = builder.add_source(env);
        }

        let raw: RawConfig = builder.build()?.try_deserialize()?;
        let config = Self::from_raw(raw)?;

        if let Err(e) = check_tool(&config.tool_path) {
            warn!("Configured tool is not usable yet, jobs will fail until it is: {}", e);
        }
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> ConfigResult<Self> {
        let defaults = Self::default();

        let max_concurrent_jobs = at_least_one(
            raw.max_concurrent_jobs
                .ok_or(ConfigError::MissingKey("max_concurrent_jobs"))?,
            "max_concurrent_jobs",
        )? as usize;

        let job_timeout = Duration::from_secs(at_least_one(
            raw.job_timeout_seconds
                .ok_or(ConfigError::MissingKey("job_timeout_seconds"))?,
            "job_timeout_seconds",
        )?);

        let tool_path = raw
            .tool_path
            .ok_or(ConfigError::MissingKey("tool_path"))?;
        let tool_path = PathBuf::from(tool_path.trim());
        if !tool_path.is_absolute() {
            return Err(ConfigError::invalid("tool_path", "must be an absolute path"));
        }

        let port = match raw.port {
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ConfigError::invalid("port", "must be between 1 and 65535"))?,
            None => defaults.port,
        };

        let artifact_dir = raw
            .artifact_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.artifact_dir);
        let work_dir = raw
            .work_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| artifact_dir.join(".work"));

        let seconds = |value: Option<i64>, key: &'static str, default: Duration| {
            value
                .map(|v| at_least_one(v, key).map(Duration::from_secs))
                .unwrap_or(Ok(default))
        };

        let kill_grace = match raw.kill_grace_seconds {
            Some(v) if v < 0 => {
                return Err(ConfigError::invalid("kill_grace_seconds", "must not be negative"))
            }
            Some(v) => Duration::from_secs(v as u64),
            None => defaults.kill_grace,
        };

        let max_retries = match raw.max_retries {
            Some(v) if !(0..=MAX_RETRIES_LIMIT).contains(&v) => {
                return Err(ConfigError::invalid(
                    "max_retries",
                    format!("must be between 0 and {}", MAX_RETRIES_LIMIT),
                ))
            }
            Some(v) => v as u32,
            None => defaults.max_retries,
        };

        let retry_delay = match raw.retry_delay_seconds {
            Some(v) if v < 0 => {
                return Err(ConfigError::invalid("retry_delay_seconds", "must not be negative"))
            }
            Some(v) => Duration::from_secs(v as u64),
            None => defaults.retry_delay,
        };

        let allowed_input_extensions = raw
            .allowed_input_extensions
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            host: raw.host.unwrap_or(defaults.host),
            port,
            max_concurrent_jobs,
            job_timeout,
            tool_path,
            tool_args: raw.tool_args.unwrap_or_default(),
            artifact_dir,
            work_dir,
            max_queued_jobs: match raw.max_queued_jobs {
                Some(v) => at_least_one(v, "max_queued_jobs")? as usize,
                None => defaults.max_queued_jobs,
            },
            kill_grace,
            result_retention: seconds(
                raw.result_retention_seconds,
                "result_retention_seconds",
                defaults.result_retention,
            )?,
            retention_sweep_interval: seconds(
                raw.retention_sweep_seconds,
                "retention_sweep_seconds",
                defaults.retention_sweep_interval,
            )?,
            shutdown_timeout: match raw.shutdown_timeout_seconds {
                Some(v) if v < 0 => {
                    return Err(ConfigError::invalid(
                        "shutdown_timeout_seconds",
                        "must not be negative",
                    ))
                }
                Some(v) => Duration::from_secs(v as u64),
                None => defaults.shutdown_timeout,
            },
            max_retries,
            retry_delay,
            allowed_input_extensions,
            max_body_size: match raw.max_body_size {
                Some(v) => at_least_one(v, "max_body_size")? as usize,
                None => defaults.max_body_size,
            },
            cors_origins: raw.cors_origins.unwrap_or(defaults.cors_origins),
            environment: raw
                .environment
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or(defaults.environment),
            metrics_enabled: raw.metrics_enabled.unwrap_or(defaults.metrics_enabled),
        })
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Create the artifact and work directories.
    pub async fn prepare_dirs(&self) -> ConfigResult<()> {
        for dir in [&self.artifact_dir, &self.work_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ConfigError::Prepare {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let mut runner = RunnerConfig::new(self.tool_path.clone(), self.artifact_dir.clone());
        runner.tool_args = self.tool_args.clone();
        runner.timeout = self.job_timeout;
        runner.kill_grace = self.kill_grace;
        runner.work_dir = self.work_dir.clone();
        runner
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(self.max_concurrent_jobs, self.runner_config())
            .with_shutdown_timeout(self.shutdown_timeout)
            .with_queue(QueueConfig {
                max_queued_jobs: self.max_queued_jobs,
            })
            .with_retry(RetryPolicy::new(self.max_retries, self.retry_delay))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            retention: self.result_retention,
            sweep_interval: self.retention_sweep_interval,
        }
    }
}

/// Pick the configuration directory: first CLI argument, then
/// `MEDIAQ_CONFIG_DIR`, then [`DEFAULT_CONFIG_DIR`].
pub fn config_dir(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
}

fn at_least_one(value: i64, key: &'static str) -> ConfigResult<u64> {
    if value < 1 {
        return Err(ConfigError::invalid(key, "must be at least 1"));
    }
    Ok(value as u64)
}

fn file_format(path: &Path) -> Option<FileFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "toml" => Some(FileFormat::Toml),
        "yaml" | "yml" => Some(FileFormat::Yaml),
        "json" => Some(FileFormat::Json),
        _ => None,
    }
}

/// Supported files in `dir`, sorted by file name.
fn config_files(dir: &Path) -> ConfigResult<Vec<(PathBuf, FileFormat)>> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_file() {
            continue;
        }
        if let Some(format) = file_format(&path) {
            files.push((path, format));
        }
    }
    files.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(files)
}
