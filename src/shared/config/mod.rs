//! Queue configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SYNCQ_*` environment variables. Every layer goes through
//! [`QueueConfig::validate`] before a queue is built from it.
//!
//! ```toml
//! api_url = "https://sync.example.com"
//! concurrency_limit = 3
//! max_retries = 3
//! drain_interval_secs = 300
//! use_background_worker = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default API base URL
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Base URL of the sync API
    pub api_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Maximum number of handler calls in flight during a drain
    pub concurrency_limit: usize,
    /// Retry budget for new operations
    pub max_retries: u32,
    /// Base of the exponential backoff, in milliseconds
    pub backoff_base_ms: u64,
    /// Period of the background drain timer
    pub drain_interval_secs: u64,
    /// How long completed operations are kept before the sweep removes them
    pub completed_retention_hours: u64,
    /// Hard timeout per handler invocation, in milliseconds
    pub handler_timeout_ms: Option<u64>,
    /// Run analysis jobs on a dedicated worker thread
    pub use_background_worker: bool,
    /// SQLite file; defaults to the platform data directory
    pub database_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            concurrency_limit: 3,
            max_retries: 3,
            backoff_base_ms: 1000,
            drain_interval_secs: 300,
            completed_retention_hours: 24,
            handler_timeout_ms: None,
            use_background_worker: true,
            database_path: None,
        }
    }
}

impl QueueConfig {
    /// Create a new builder seeded with defaults
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Load configuration: defaults or `path`, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse TOML text; missing keys fall back to defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SYNCQ_*` overrides looked up through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SYNCQ_API_URL") {
            self.api_url = url;
        }
        if let Some(token) = lookup("SYNCQ_API_TOKEN") {
            self.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(raw) = lookup("SYNCQ_CONCURRENCY") {
            self.concurrency_limit = parse_field("SYNCQ_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("SYNCQ_MAX_RETRIES") {
            self.max_retries = parse_field("SYNCQ_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("SYNCQ_DRAIN_INTERVAL_SECS") {
            self.drain_interval_secs = parse_field("SYNCQ_DRAIN_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SYNCQ_HANDLER_TIMEOUT_MS") {
            self.handler_timeout_ms = Some(parse_field("SYNCQ_HANDLER_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("SYNCQ_BACKGROUND_WORKER") {
            self.use_background_worker = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        if let Some(path) = lookup("SYNCQ_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.api_url.clone()));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::invalid("concurrency_limit", "must be at least 1"));
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::invalid("backoff_base_ms", "must be greater than zero"));
        }
        if self.drain_interval_secs == 0 {
            return Err(ConfigError::invalid("drain_interval_secs", "must be greater than zero"));
        }
        if self.handler_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("handler_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    /// Full URL for an API path
    pub fn api_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_hours * 3600)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    /// Resolved SQLite path
    ///
    /// Uses the system's data directory when no explicit path is configured.
    pub fn resolved_database_path(&self) -> PathBuf {
        if let Some(path) = &self.database_path {
            return path.clone();
        }
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("syncq");
        path.push("queue.db");
        path
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("cannot parse '{}'", raw)))
}

/// Builder for QueueConfig
#[derive(Debug, Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Set the API base URL
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config.drain_interval_secs = interval.as_secs();
        self
    }

    pub fn completed_retention_hours(mut self, hours: u64) -> Self {
        self.config.completed_retention_hours = hours;
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        // Sub-millisecond timeouts round up rather than collapsing to zero
        let millis = match timeout.as_millis() {
            0 if !timeout.is_zero() => 1,
            ms => u64::try_from(ms).unwrap_or(u64::MAX),
        };
        self.config.handler_timeout_ms = Some(millis);
        self
    }

    pub fn background_worker(mut self, enabled: bool) -> Self {
        self.config.use_background_worker = enabled;
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<QueueConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
