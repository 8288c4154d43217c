//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::{PipelineConfig, PublishMode};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on the in-memory store
/// - `COMMAND_TIMEOUT_MS`: deadline of each request's command (default: `5000`)
/// - `FINALIZE_TIMEOUT_MS`: bound on every commit and rollback (default: `5000`)
/// - `EVENT_ERROR_CHANNEL_CAPACITY`: event handler failure buffer (default: `256`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub command_timeout: Duration,
    pub finalize_timeout: Duration,
    pub error_channel_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            command_timeout: millis("COMMAND_TIMEOUT_MS", defaults.command_timeout),
            finalize_timeout: millis("FINALIZE_TIMEOUT_MS", defaults.finalize_timeout),
            error_channel_capacity: lookup("EVENT_ERROR_CHANNEL_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|&c| c > 0)
                .unwrap_or(defaults.error_channel_capacity),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pipeline settings derived from this configuration.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            finalize_timeout: self.finalize_timeout,
            error_channel_capacity: self.error_channel_capacity,
            publish_mode: PublishMode::Async,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            command_timeout: Duration::from_millis(5000),
            finalize_timeout: Duration::from_millis(5000),
            error_channel_capacity: 256,
        }
    }
}
