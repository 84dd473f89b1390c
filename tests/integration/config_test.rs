//! Configuration loading from TOML files and the environment

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

use syncq::shared::{ConfigError, QueueConfig};

const VARS: [&str; 4] = [
    "SYNCQ_API_URL",
    "SYNCQ_MAX_RETRIES",
    "SYNCQ_CONCURRENCY",
    "SYNCQ_HANDLER_TIMEOUT_MS",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_file_then_environment() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api_url = \"https://sync.example.com\"").unwrap();
    writeln!(file, "max_retries = 5").unwrap();
    writeln!(file, "drain_interval_secs = 60").unwrap();

    std::env::set_var("SYNCQ_MAX_RETRIES", "7");
    std::env::set_var("SYNCQ_HANDLER_TIMEOUT_MS", "1500");
    let config = QueueConfig::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.api_url, "https://sync.example.com");
    assert_eq!(config.max_retries, 7);
    assert_eq!(config.drain_interval(), Duration::from_secs(60));
    assert_eq!(config.handler_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(config.concurrency_limit, 3);
}

#[test]
#[serial]
fn test_invalid_environment_value() {
    clear_env();
    std::env::set_var("SYNCQ_CONCURRENCY", "lots");
    let result = QueueConfig::load(None);
    clear_env();

    assert_matches!(result, Err(ConfigError::InvalidValue { field: "SYNCQ_CONCURRENCY", .. }));
}

#[test]
#[serial]
fn test_environment_url_is_validated() {
    clear_env();
    std::env::set_var("SYNCQ_API_URL", "ftp://nope");
    let result = QueueConfig::load(None);
    clear_env();

    assert_matches!(result, Err(ConfigError::InvalidUrl(url)) if url == "ftp://nope");
}

#[test]
fn test_missing_file() {
    let result = QueueConfig::load(Some(std::path::Path::new("/nonexistent/syncq.toml")));
    assert_matches!(result, Err(ConfigError::Io(_)));
}

#[test]
fn test_sub_second_timeouts_keep_precision() {
    let config = QueueConfig::from_toml_str("handler_timeout_ms = 500").unwrap();
    assert_eq!(config.handler_timeout(), Some(Duration::from_millis(500)));

    let config = QueueConfig::builder()
        .handler_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    assert_eq!(config.handler_timeout(), Some(Duration::from_millis(500)));
    assert_eq!(config.handler_timeout_ms, Some(500));
}
