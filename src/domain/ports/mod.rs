//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the services depend on:
//! - repositories for state machines, orchestrators, worker tasks and
//!   verification entities
//! - collaborators that run stage business logic
//! - the task-complete event publisher
//! - the clock

pub mod analysis_collaborators;
pub mod clock;
pub mod event_publisher;
pub mod learning_engine_task_repository;
pub mod orchestrator_repository;
pub mod state_machine_repository;
pub mod verification_task_repository;

pub use analysis_collaborators::{AnalysisOutcomeInspector, NeverFailFast, NullSliAnalyzer, SliAnalyzer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event_publisher::{NullEventPublisher, StateMachineEventPublisher, TaskCompleteEvent};
pub use learning_engine_task_repository::LearningEngineTaskRepository;
pub use orchestrator_repository::AnalysisOrchestratorRepository;
pub use state_machine_repository::AnalysisStateMachineRepository;
pub use verification_task_repository::{VerificationJobInstanceRepository, VerificationTaskRepository};
