//! Configuration Loader
//!
//! Environment-aware configuration loading on top of the `config` crate. Sources
//! are layered lowest to highest priority:
//!
//! 1. Built-in defaults ([`BatchillerConfig::default`])
//! 2. `<dir>/batchiller.{toml,json,yaml}`
//! 3. `<dir>/batchiller.<environment>.{toml,json,yaml}`
//! 4. Environment variables such as `BATCHILLER__EXECUTOR__MAX_CONCURRENT_JOBS=20`

use super::BatchillerConfig;
use crate::error::Result;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "batchiller";
const ENV_PREFIX: &str = "BATCHILLER";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    config: BatchillerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            max_concurrent_jobs = config.executor.max_concurrent_jobs,
            loader_enabled = config.loader.enabled,
            jobs_directory = %config.loader.jobs_directory.display(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build(directory: &Path, environment: &str) -> Result<BatchillerConfig> {
        let settings = Config::builder()
            .add_source(Config::try_from(&BatchillerConfig::default())?)
            .add_source(File::from(directory.join(BASE_FILE_STEM)).required(false))
            .add_source(
                File::from(directory.join(format!("{BASE_FILE_STEM}.{environment}"))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<BatchillerConfig>()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &BatchillerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("BATCHILLER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("BATCHILLER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
