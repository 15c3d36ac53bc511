pub mod analysis_state_machine_service;
pub mod engine;
pub mod event_publisher;
pub mod executors;
pub mod learning_engine_task_service;
pub mod orchestration_poller;
pub mod orchestration_service;
pub mod state_machine_factory;

pub use analysis_state_machine_service::AnalysisStateMachineService;
pub use engine::{Collaborators, Engine};
pub use event_publisher::BroadcastEventPublisher;
pub use executors::{ExecutorRegistry, StateExecutor, StepContext};
pub use learning_engine_task_service::{LearningEngineTaskService, TaskTimings};
pub use orchestration_poller::{OrchestrationPoller, TickSummary};
pub use orchestration_service::OrchestrationService;
pub use state_machine_factory::StateMachineFactory;
