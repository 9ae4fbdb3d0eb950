//! # Configuration
//!
//! Typed settings for the engine, loader, record store and logging. Every field
//! has a default, so an empty configuration source yields a working system.
//! [`ConfigManager`] layers files and `BATCHILLER__*` environment variables on
//! top of these defaults.

pub mod loader;

pub use loader::ConfigManager;

use crate::error::{BatchillerError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BatchillerConfig {
    pub executor: ExecutorConfig,
    pub loader: LoaderConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

/// Worker pool, timeout clamp, shutdown drain and retry backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Size of the bounded worker pool
    pub max_concurrent_jobs: usize,
    /// Executions allowed to wait for a worker before submissions are rejected
    pub queue_capacity: usize,
    /// Upper bound applied to every job's declared timeout
    pub max_job_timeout_secs: u64,
    /// Graceful drain bound at shutdown
    pub shutdown_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            queue_capacity: 100,
            max_job_timeout_secs: 3600,
            shutdown_timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn max_job_timeout(&self) -> Duration {
        Duration::from_secs(self.max_job_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Exponential backoff between retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_delay_ms as f64 {
            return Duration::from_millis(self.max_delay_ms);
        }
        Duration::from_millis(millis as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub enabled: bool,
    pub jobs_directory: PathBuf,
    pub scan_interval_seconds: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jobs_directory: PathBuf::from("./jobs"),
            scan_interval_seconds: 10,
        }
    }
}

impl LoaderConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Default page size for history queries
    pub limit: usize,
    /// Retention bound of the in-memory record store
    pub max_records: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            max_records: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overrides the environment-derived level when set
    pub level: Option<String>,
    /// Enables the JSON file layer when set
    pub directory: Option<PathBuf>,
}

impl BatchillerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.executor.max_concurrent_jobs == 0 {
            return Err(BatchillerError::configuration(
                "executor.max_concurrent_jobs",
                "must be at least 1",
            ));
        }
        if self.executor.max_job_timeout_secs == 0 {
            return Err(BatchillerError::configuration(
                "executor.max_job_timeout_secs",
                "must be greater than zero",
            ));
        }
        if !(self.executor.retry.backoff_multiplier >= 1.0) {
            return Err(BatchillerError::configuration(
                "executor.retry.backoff_multiplier",
                format!("must be >= 1.0, got {}", self.executor.retry.backoff_multiplier),
            ));
        }
        if self.executor.retry.max_delay_ms < self.executor.retry.base_delay_ms {
            return Err(BatchillerError::configuration(
                "executor.retry.max_delay_ms",
                "must not be smaller than base_delay_ms",
            ));
        }
        if self.loader.enabled && self.loader.scan_interval_seconds == 0 {
            return Err(BatchillerError::configuration(
                "loader.scan_interval_seconds",
                "must be greater than zero",
            ));
        }
        if self.loader.enabled && self.loader.jobs_directory.as_os_str().is_empty() {
            return Err(BatchillerError::configuration(
                "loader.jobs_directory",
                "must not be empty",
            ));
        }
        if self.history.limit == 0 {
            return Err(BatchillerError::configuration("history.limit", "must be at least 1"));
        }
        Ok(())
    }
}
