//! Configuration management for prewarm
//!
//! Process-level configuration (worker, HTTP, database, logging) is loaded
//! from environment variables or a TOML file. Site-level settings that an
//! operator changes at runtime live in the option store and are read through
//! [`settings`].

pub mod settings;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::retry::RetryConfig;

pub use settings::{DomainSettings, EntryPoint, RequestHeader, WarmerSettings};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker configuration
    pub worker: WorkerConfig,

    /// HTTP client configuration
    pub http: HttpConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Queue worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between queue polls
    pub poll_interval_secs: u64,

    /// Maximum jobs claimed per poll
    pub batch_size: usize,

    /// Maximum jobs handled concurrently
    pub max_concurrent_jobs: usize,

    /// Retry policy for failing jobs
    pub retry: RetryConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds (remote warmers and local warm-up)
    pub request_timeout_secs: u64,

    /// Default user agent when the site sets none
    pub user_agent: String,

    /// Local warm-up rate limit (requests per second)
    pub local_rate_limit: u32,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path (options, job queue and visit log)
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let retry = RetryConfig::with_delays(
            env_parse("PREWARM_MAX_ATTEMPTS", defaults.worker.retry.max_attempts),
            env_parse("PREWARM_RETRY_BASE_DELAY", defaults.worker.retry.base_delay_secs),
            env_parse("PREWARM_RETRY_MAX_DELAY", defaults.worker.retry.max_delay_secs),
        );

        let user_agent =
            std::env::var("PREWARM_USER_AGENT").unwrap_or(defaults.http.user_agent);

        let sqlite_path = std::env::var("PREWARM_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database.sqlite_path);

        let log_level =
            std::env::var("PREWARM_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("PREWARM_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            worker: WorkerConfig {
                poll_interval_secs: env_parse(
                    "PREWARM_POLL_INTERVAL",
                    defaults.worker.poll_interval_secs,
                ),
                batch_size: env_parse("PREWARM_BATCH_SIZE", defaults.worker.batch_size),
                max_concurrent_jobs: env_parse(
                    "PREWARM_MAX_CONCURRENT_JOBS",
                    defaults.worker.max_concurrent_jobs,
                ),
                retry,
            },
            http: HttpConfig {
                request_timeout_secs: env_parse(
                    "PREWARM_REQUEST_TIMEOUT",
                    defaults.http.request_timeout_secs,
                ),
                user_agent,
                local_rate_limit: env_parse(
                    "PREWARM_LOCAL_RATE_LIMIT",
                    defaults.http.local_rate_limit,
                ),
            },
            database: DatabaseConfig { sqlite_path },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.worker.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.worker.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.worker.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.worker.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be greater than 0");
        }

        if self.http.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.http.local_rate_limit == 0 {
            anyhow::bail!("local_rate_limit must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker.poll_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig {
                poll_interval_secs: 5,
                batch_size: 20,
                max_concurrent_jobs: 4,
                retry: RetryConfig::default(),
            },
            http: HttpConfig {
                request_timeout_secs: 30,
                user_agent: format!("prewarm/{}", env!("CARGO_PKG_VERSION")),
                local_rate_limit: 2,
            },
            database: DatabaseConfig {
                sqlite_path: PathBuf::from("data/prewarm.db"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_concurrency() {
        let mut config = Config::default();
        config.worker.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "yaml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }
}
