//! Wires repositories and services into a running engine.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::adapters::sqlite::{
    SqliteAnalysisOrchestratorRepository, SqliteAnalysisStateMachineRepository,
    SqliteLearningEngineTaskRepository, SqliteVerificationJobInstanceRepository,
    SqliteVerificationTaskRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{
    AnalysisOutcomeInspector, Clock, NeverFailFast, NullSliAnalyzer, SliAnalyzer, SystemClock,
    VerificationJobInstanceRepository, VerificationTaskRepository,
};
use crate::services::executors::ExecutorRegistry;
use crate::services::{
    AnalysisStateMachineService, BroadcastEventPublisher, LearningEngineTaskService,
    OrchestrationPoller, OrchestrationService, StateMachineFactory,
};

/// Business logic plugged into the pipeline stages.
#[derive(Clone)]
pub struct Collaborators {
    pub sli_analyzer: Arc<dyn SliAnalyzer>,
    pub inspector: Arc<dyn AnalysisOutcomeInspector>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            sli_analyzer: Arc::new(NullSliAnalyzer),
            inspector: Arc::new(NeverFailFast),
            clock: Arc::new(SystemClock),
        }
    }
}

/// The full service graph over one database pool.
#[derive(Clone)]
pub struct Engine {
    pub verification_tasks: Arc<dyn VerificationTaskRepository>,
    pub job_instances: Arc<dyn VerificationJobInstanceRepository>,
    pub tasks: Arc<LearningEngineTaskService>,
    pub state_machines: Arc<AnalysisStateMachineService>,
    pub orchestration: Arc<OrchestrationService>,
    pub publisher: BroadcastEventPublisher,
    pub config: Config,
}

impl Engine {
    /// Wire every store and service over `pool`.
    pub fn new(pool: SqlitePool, config: Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            sli_analyzer,
            inspector,
            clock,
        } = collaborators;

        let verification_tasks: Arc<dyn VerificationTaskRepository> =
            Arc::new(SqliteVerificationTaskRepository::new(pool.clone()));
        let job_instances: Arc<dyn VerificationJobInstanceRepository> =
            Arc::new(SqliteVerificationJobInstanceRepository::new(pool.clone()));
        let publisher = BroadcastEventPublisher::default();

        let tasks = Arc::new(LearningEngineTaskService::new(
            Arc::new(SqliteLearningEngineTaskRepository::new(pool.clone())),
            verification_tasks.clone(),
            Arc::new(publisher.clone()),
            clock.clone(),
            config.learning_engine.clone(),
        ));
        let state_machines = Arc::new(AnalysisStateMachineService::new(
            Arc::new(SqliteAnalysisStateMachineRepository::new(pool.clone())),
            verification_tasks.clone(),
            tasks.clone(),
            ExecutorRegistry::standard(sli_analyzer, inspector, config.features.clone()),
            StateMachineFactory::standard(),
            clock.clone(),
            config.orchestration.clone(),
        ));
        let orchestration = Arc::new(OrchestrationService::new(
            Arc::new(SqliteAnalysisOrchestratorRepository::new(pool)),
            verification_tasks.clone(),
            job_instances.clone(),
            state_machines.clone(),
            clock,
            config.orchestration.clone(),
        ));

        Self {
            verification_tasks,
            job_instances,
            tasks,
            state_machines,
            orchestration,
            publisher,
            config,
        }
    }

    /// A poller sharing this engine's services.
    pub fn poller(&self) -> OrchestrationPoller {
        OrchestrationPoller::new(
            self.orchestration.clone(),
            self.tasks.clone(),
            self.config.orchestration.clone(),
        )
    }
}
