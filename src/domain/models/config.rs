use serde::{Deserialize, Serialize};

/// Main configuration structure for Vigil
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduling, retry and backlog policy
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// Learning engine work queue
    #[serde(default)]
    pub learning_engine: LearningEngineConfig,

    /// Feature flags
    #[serde(default)]
    pub features: FeatureFlags,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".vigil/vigil.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection URL for the configured path.
    pub fn url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite:{}", self.path)
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation policy for file logs: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            retention_days: default_retention_days(),
        }
    }
}

/// Orchestration policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestrationConfig {
    /// Attempts a state gets before it is finalized
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Backlog entries whose window ended longer ago than this are ignored
    #[serde(default = "default_ignore_minutes")]
    pub state_machine_ignore_minutes: i64,

    /// Maximum backlog entries scanned per tick
    #[serde(default = "default_ignore_limit")]
    pub state_machine_ignore_limit: usize,

    /// First retry delay for a failed state, in seconds
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Upper bound on the retry delay, in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Interval between poller passes, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Re-reads attempted after an optimistic version conflict
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Orchestrators ticked concurrently by one poller pass
    #[serde(default = "default_max_concurrent_ticks")]
    pub max_concurrent_ticks: usize,
}

const fn default_max_retry_count() -> u32 {
    3
}

const fn default_ignore_minutes() -> i64 {
    180
}

const fn default_ignore_limit() -> usize {
    100
}

const fn default_initial_backoff_secs() -> u64 {
    60
}

const fn default_max_backoff_secs() -> u64 {
    900
}

const fn default_poll_interval_secs() -> u64 {
    60
}

const fn default_conflict_retries() -> u32 {
    3
}

const fn default_max_concurrent_ticks() -> usize {
    8
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            state_machine_ignore_minutes: default_ignore_minutes(),
            state_machine_ignore_limit: default_ignore_limit(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            conflict_retries: default_conflict_retries(),
            max_concurrent_ticks: default_max_concurrent_ticks(),
        }
    }
}

/// Learning engine queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LearningEngineConfig {
    /// RUNNING tasks not updated for this long are reaped to TIMEOUT
    #[serde(default = "default_task_timeout_minutes")]
    pub task_timeout_minutes: i64,

    /// Base URL workers use to fetch inputs and post results
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Maximum rows per batched insert
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

const fn default_task_timeout_minutes() -> i64 {
    10
}

fn default_base_url() -> String {
    "http://localhost:6060/cv/api".to_string()
}

const fn default_batch_size() -> usize {
    100
}

impl Default for LearningEngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_minutes: default_task_timeout_minutes(),
            base_url: default_base_url(),
            batch_size: default_batch_size(),
        }
    }
}

/// Feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeatureFlags {
    /// Run the feedback stage after deployment log analysis
    #[serde(default)]
    pub deployment_log_feedback: bool,
}
