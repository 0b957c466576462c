//! `MEDIAQ_*` environment overrides.
//!
//! A separate test binary with a single test: the process environment is
//! shared by every test in a binary.

use std::time::Duration;

use mediaq_api::{ConfigError, ServiceConfig};
use tempfile::TempDir;

const OVERRIDES: &[(&str, &str)] = &[
    ("MEDIAQ_MAX_CONCURRENT_JOBS", "4"),
    ("MEDIAQ_TOOL_ARGS", "-hide_banner,-nostats"),
    ("MEDIAQ_ALLOWED_INPUT_EXTENSIONS", "mp4,MOV"),
    ("MEDIAQ_RETRY_DELAY_SECONDS", "9"),
];

fn clear(keys: &[&str]) {
    for key in keys {
        std::env::remove_var(key);
    }
}

#[test]
fn test_environment_overrides_directory_values() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("service.toml"),
        r#"
max_concurrent_jobs = 2
job_timeout_seconds = 60
tool_path = "/usr/bin/ffmpeg"
tool_args = ["-loglevel", "error"]
max_retries = 1
"#,
    )
    .unwrap();

    for (key, value) in OVERRIDES {
        std::env::set_var(key, value);
    }
    let loaded = ServiceConfig::load(dir.path());
    let files_only = ServiceConfig::load_files(dir.path());
    clear(&OVERRIDES.iter().map(|(k, _)| *k).collect::<Vec<_>>());

    let config = loaded.unwrap();
    assert_eq!(config.max_concurrent_jobs, 4);
    assert_eq!(config.tool_args, vec!["-hide_banner", "-nostats"]);
    assert_eq!(config.allowed_input_extensions, vec!["mp4", "mov"]);
    assert_eq!(config.retry_delay, Duration::from_secs(9));
    assert_eq!(config.job_timeout, Duration::from_secs(60));
    assert_eq!(config.max_retries, 1);

    let files_only = files_only.unwrap();
    assert_eq!(files_only.max_concurrent_jobs, 2);
    assert_eq!(files_only.tool_args, vec!["-loglevel", "error"]);

    // Overrides go through the same validation as file values
    std::env::set_var("MEDIAQ_MAX_CONCURRENT_JOBS", "0");
    let invalid = ServiceConfig::load(dir.path());
    clear(&["MEDIAQ_MAX_CONCURRENT_JOBS"]);
    assert!(matches!(
        invalid,
        Err(ConfigError::InvalidValue {
            key: "max_concurrent_jobs",
            ..
        })
    ));
}
