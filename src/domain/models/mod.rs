//! Domain models for the orchestration engine.

pub mod analysis_input;
pub mod analysis_state;
pub mod config;
pub mod learning_engine_task;
pub mod orchestrator;
pub mod state_machine;
pub mod verification_task;

pub use analysis_input::AnalysisInput;
pub use analysis_state::{AnalysisState, AnalysisStatus, ClusterLevel, StateType};
pub use config::{
    Config, DatabaseConfig, FeatureFlags, LearningEngineConfig, LoggingConfig,
    OrchestrationConfig,
};
pub use learning_engine_task::{
    LearningEngineTask, LearningEngineTaskStatus, LearningEngineTaskType, TaskPriority,
};
pub use orchestrator::{AnalysisOrchestrator, OrchestratorStatus};
pub use state_machine::AnalysisStateMachine;
pub use verification_task::{
    DataSourceKind, ExecutionStatus, VerificationJobInstance, VerificationStatus,
    VerificationTask, VerificationTaskType,
};
