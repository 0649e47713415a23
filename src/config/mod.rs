//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString to keep
//! credentials out of logs.

pub mod secrets;

use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Tuning for the workflow engine and the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts per action before a retryable failure becomes final.
    pub max_attempts: u32,
    /// Retry `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Activities at this depth no longer trigger workflows.
    pub max_cascade_depth: u32,
    pub scan_interval: Duration,
    pub max_concurrent_evaluations: usize,
    pub webhook_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(30),
            max_cascade_depth: 8,
            scan_interval: Duration::from_secs(60),
            max_concurrent_evaluations: 8,
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by whichever variables are set.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            max_attempts: optional_var("ACTION_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            retry_backoff: optional_var("ACTION_RETRY_BACKOFF_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
            max_cascade_depth: optional_var("MAX_CASCADE_DEPTH")?
                .unwrap_or(defaults.max_cascade_depth),
            scan_interval: optional_var("SCAN_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.scan_interval),
            max_concurrent_evaluations: optional_var("MAX_CONCURRENT_EVALUATIONS")?
                .unwrap_or(defaults.max_concurrent_evaluations),
            webhook_timeout: optional_var("WEBHOOK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_timeout),
        };
        if config.max_attempts == 0 {
            return Err(Error::Config("ACTION_MAX_ATTEMPTS must be at least 1".into()));
        }
        if config.max_concurrent_evaluations == 0 {
            return Err(Error::Config(
                "MAX_CONCURRENT_EVALUATIONS must be at least 1".into(),
            ));
        }
        if config.scan_interval.is_zero() {
            return Err(Error::Config("SCAN_INTERVAL_SECS must be at least 1".into()));
        }
        Ok(config)
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} is not a valid value: {raw}"))),
        Err(_) => Ok(None),
    }
}
