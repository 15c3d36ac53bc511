//! Vigil - continuous verification analysis orchestration
//!
//! Vigil schedules ML analysis for monitored entities. Each analysis window
//! runs as a state machine whose stages hand work to an external pool of
//! learning-engine workers through a priority task queue. One orchestrator
//! per entity keeps windows strictly ordered and drops stale ones.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, ports and errors
//! - **Adapters** (`adapters`): SQLite repositories and migrations
//! - **Service Layer** (`services`): stage executors, state machine and
//!   orchestration services, the task queue and the poller
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): operator commands
//!
//! # Example
//!
//! ```ignore
//! use vigil::adapters::sqlite::initialize_database;
//! use vigil::domain::models::{AnalysisInput, Config};
//! use vigil::services::{Collaborators, Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let pool = initialize_database(&config.database.url(), None).await?;
//!     let engine = Engine::new(pool, config, Collaborators::default());
//!     engine.orchestration.queue_analysis(input).await?;
//!     engine.poller().tick().await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AnalysisInput, AnalysisOrchestrator, AnalysisState, AnalysisStateMachine, AnalysisStatus,
    Config, LearningEngineTask, LearningEngineTaskStatus, LearningEngineTaskType,
    OrchestratorStatus, StateType, VerificationTask, VerificationTaskType,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Collaborators, Engine, OrchestrationPoller, OrchestrationService};
