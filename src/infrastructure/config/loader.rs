use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project directory holding config files and the database.
pub const CONFIG_DIR: &str = ".vigil";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_retry_count: {0}. Must be at least 1")]
    InvalidMaxRetryCount(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid state_machine_ignore_limit: {0}. Must be at least 1")]
    InvalidIgnoreLimit(usize),

    #[error("Invalid task_timeout_minutes: {0}. Must be positive")]
    InvalidTaskTimeout(i64),

    #[error(
        "Invalid backoff configuration: initial_backoff_secs ({0}) must be less than max_backoff_secs ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(usize),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .vigil/config.yaml (project config, created by init)
    /// 3. .vigil/local.yaml (project local overrides, optional)
    /// 4. Environment variables (VIGIL_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same as [`ConfigLoader::load`] with the project directory at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring VIGIL_* overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        let orchestration = &config.orchestration;
        if orchestration.max_retry_count == 0 {
            return Err(ConfigError::InvalidMaxRetryCount(orchestration.max_retry_count));
        }
        if orchestration.state_machine_ignore_limit == 0 {
            return Err(ConfigError::InvalidIgnoreLimit(
                orchestration.state_machine_ignore_limit,
            ));
        }
        if orchestration.initial_backoff_secs >= orchestration.max_backoff_secs {
            return Err(ConfigError::InvalidBackoff(
                orchestration.initial_backoff_secs,
                orchestration.max_backoff_secs,
            ));
        }
        if orchestration.state_machine_ignore_minutes <= 0 {
            return Err(ConfigError::ValidationFailed(
                "state_machine_ignore_minutes must be positive".to_string(),
            ));
        }

        if config.learning_engine.task_timeout_minutes <= 0 {
            return Err(ConfigError::InvalidTaskTimeout(
                config.learning_engine.task_timeout_minutes,
            ));
        }
        if config.learning_engine.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(config.learning_engine.batch_size));
        }
        if config.learning_engine.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "learning_engine.base_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
