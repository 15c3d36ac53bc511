//! Per-stage analysis executors.
//!
//! Every pipeline stage is driven through the same `StateExecutor` interface:
//! `execute` dispatches work for the stage, `get_execution_status` reads the
//! outcome back, and the `handle_*` hooks apply the resulting transition to
//! the stage record. The state machine service looks executors up by
//! `StateType` in an `ExecutorRegistry`.

mod deployment;
mod live_monitoring;
mod slo;
mod worker_stage;

pub use deployment::{DeploymentAnalysisExecutor, HostSamplingExecutor};
pub use live_monitoring::ServiceGuardLogClusterExecutor;
pub use slo::SloMetricAnalysisExecutor;
pub use worker_stage::WorkerStageExecutor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisState, AnalysisStatus, FeatureFlags, LearningEngineTask, LearningEngineTaskStatus,
    LearningEngineTaskType, StateType, VerificationTask, VerificationTaskType,
};
use crate::domain::ports::{AnalysisOutcomeInspector, SliAnalyzer};
use crate::services::LearningEngineTaskService;

/// Everything an executor may consult while stepping one stage.
pub struct StepContext<'a> {
    /// Entity the stepped machine belongs to.
    pub verification_task: &'a VerificationTask,
    /// Queue for dispatching and reading worker tasks.
    pub tasks: &'a LearningEngineTaskService,
    /// Clock reading shared by the whole step.
    pub now: DateTime<Utc>,
}

impl StepContext<'_> {
    /// A worker task covering `[start, end)` for the stage's entity.
    pub fn worker_task(
        &self,
        analysis_type: LearningEngineTaskType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> LearningEngineTask {
        LearningEngineTask::new(
            &self.verification_task.id,
            &self.verification_task.account_id,
            analysis_type,
            start,
            end,
            self.now,
        )
    }

    /// Enqueue worker tasks and record their ids on the stage.
    pub async fn dispatch(
        &self,
        state: &mut AnalysisState,
        tasks: Vec<LearningEngineTask>,
    ) -> DomainResult<()> {
        let ids = self.tasks.create_learning_engine_tasks(tasks).await?;
        state.worker_task_ids = ids;
        state.status = AnalysisStatus::Running;
        state.started_at = Some(self.now);
        Ok(())
    }
}

/// Behaviour of one pipeline stage type.
#[async_trait]
pub trait StateExecutor: Send + Sync {
    fn state_type(&self) -> StateType;

    /// Start the stage's work.
    async fn execute(&self, state: &mut AnalysisState, ctx: &StepContext<'_>) -> DomainResult<()>;

    /// The stage that follows a successful `state`, if any.
    fn next_state(&self, state: &AnalysisState, ctx: &StepContext<'_>) -> Option<AnalysisState>;

    /// Derive the stage status from its worker tasks.
    async fn get_execution_status(
        &self,
        state: &AnalysisState,
        ctx: &StepContext<'_>,
    ) -> DomainResult<AnalysisStatus> {
        let statuses = ctx.tasks.get_task_status(&state.worker_task_ids).await?;
        let missing = state
            .worker_task_ids
            .iter()
            .filter(|id| !statuses.contains_key(id))
            .count();
        if missing > 0 {
            warn!(
                state_type = %state.state_type,
                missing,
                "worker tasks missing from queue, counting them as failed"
            );
        }
        let has_next = self.next_state(state, ctx).is_some();
        Ok(aggregate_worker_statuses(&state.worker_task_ids, &statuses, has_next))
    }

    fn handle_running(&self, state: &mut AnalysisState) {
        state.status = AnalysisStatus::Running;
    }

    /// Whether a finished stage proves the verification has already failed.
    async fn is_fail_fast(&self, _state: &AnalysisState, _ctx: &StepContext<'_>) -> DomainResult<bool> {
        Ok(false)
    }

    fn handle_success(&self, state: &mut AnalysisState) -> AnalysisStatus {
        state.status = AnalysisStatus::Success;
        AnalysisStatus::Success
    }

    /// Close `state` and return the next stage.
    fn handle_transition(
        &self,
        state: &mut AnalysisState,
        ctx: &StepContext<'_>,
    ) -> DomainResult<AnalysisState> {
        let next = self.next_state(state, ctx).ok_or_else(|| DomainError::InvalidStateTransition {
            from: state.state_type.to_string(),
            to: AnalysisStatus::Transition.to_string(),
            reason: "stage has no successor".to_string(),
        })?;
        state.status = AnalysisStatus::Success;
        Ok(next)
    }

    fn handle_retry(&self, state: &mut AnalysisState) {
        state.retry_count += 1;
        state.status = AnalysisStatus::Retry;
    }

    /// Drop the previous attempt's workers and dispatch afresh.
    ///
    /// Workers of the old attempt that are still queued or running are
    /// failed so nobody picks them up.
    async fn handle_rerun(&self, state: &mut AnalysisState, ctx: &StepContext<'_>) -> DomainResult<()> {
        ctx.tasks
            .abandon_tasks(&state.worker_task_ids, "superseded by retry")
            .await?;
        state.worker_task_ids.clear();
        state.status = AnalysisStatus::Created;
        self.execute(state, ctx).await
    }

    /// Settle a stage that ran out of retries.
    fn handle_final_statuses(
        &self,
        state: &mut AnalysisState,
        task_type: VerificationTaskType,
    ) -> AnalysisStatus {
        let status = if task_type.fails_on_exhausted_retries() {
            AnalysisStatus::Failed
        } else {
            AnalysisStatus::Ignored
        };
        state.status = status;
        status
    }
}

/// Fold worker task statuses into a stage status.
///
/// Any failure asks for a retry, otherwise any timeout reports TIMEOUT.
/// The stage completes only once every worker succeeded. Ids absent from
/// `statuses` count as failed.
pub fn aggregate_worker_statuses(
    worker_ids: &[Uuid],
    statuses: &HashMap<Uuid, LearningEngineTaskStatus>,
    has_next: bool,
) -> AnalysisStatus {
    let resolved: Vec<LearningEngineTaskStatus> = worker_ids
        .iter()
        .map(|id| statuses.get(id).copied().unwrap_or(LearningEngineTaskStatus::Failed))
        .collect();

    if resolved.contains(&LearningEngineTaskStatus::Failed) {
        AnalysisStatus::Retry
    } else if resolved.contains(&LearningEngineTaskStatus::Timeout) {
        AnalysisStatus::Timeout
    } else if resolved.iter().all(|s| *s == LearningEngineTaskStatus::Success) {
        completed(has_next)
    } else {
        AnalysisStatus::Running
    }
}

/// Status of a stage whose work ran in-process.
pub fn synchronous_status(state: &AnalysisState, has_next: bool) -> AnalysisStatus {
    match state.status {
        AnalysisStatus::Success => completed(has_next),
        AnalysisStatus::Failed => AnalysisStatus::Retry,
        _ => AnalysisStatus::Running,
    }
}

fn completed(has_next: bool) -> AnalysisStatus {
    if has_next {
        AnalysisStatus::Transition
    } else {
        AnalysisStatus::Success
    }
}

/// Lookup table from stage type to executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StateType, Arc<dyn StateExecutor>>,
}

impl ExecutorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executors for every stage the engine knows.
    pub fn standard(
        sli_analyzer: Arc<dyn SliAnalyzer>,
        inspector: Arc<dyn AnalysisOutcomeInspector>,
        features: FeatureFlags,
    ) -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(ServiceGuardLogClusterExecutor));
        registry.register(Arc::new(WorkerStageExecutor::new(
            StateType::ServiceGuardLogAnalysis,
            LearningEngineTaskType::ServiceGuardLogAnalysis,
            Some(StateType::ServiceGuardTrendAnalysis),
        )));
        registry.register(Arc::new(WorkerStageExecutor::new(
            StateType::ServiceGuardTrendAnalysis,
            LearningEngineTaskType::ServiceGuardTrendAnalysis,
            Some(StateType::ServiceGuardTimeSeries),
        )));
        registry.register(Arc::new(WorkerStageExecutor::new(
            StateType::ServiceGuardTimeSeries,
            LearningEngineTaskType::ServiceGuardTimeSeries,
            None,
        )));

        registry.register(Arc::new(HostSamplingExecutor::log()));
        registry.register(Arc::new(HostSamplingExecutor::metric()));
        registry.register(Arc::new(WorkerStageExecutor::new(
            StateType::PreDeploymentLogCluster,
            LearningEngineTaskType::LogCluster,
            None,
        )));
        registry.register(Arc::new(WorkerStageExecutor::new(
            StateType::DeploymentLogCluster,
            LearningEngineTaskType::LogCluster,
            Some(StateType::DeploymentLogAnalysis),
        )));
        registry.register(Arc::new(DeploymentAnalysisExecutor::log_analysis(
            inspector.clone(),
            features.deployment_log_feedback,
        )));
        registry.register(Arc::new(WorkerStageExecutor::new(
            StateType::DeploymentLogFeedback,
            LearningEngineTaskType::DeploymentLogFeedback,
            None,
        )));
        registry.register(Arc::new(DeploymentAnalysisExecutor::time_series(inspector)));

        registry.register(Arc::new(SloMetricAnalysisExecutor::new(
            StateType::SliMetricAnalysis,
            sli_analyzer.clone(),
        )));
        registry.register(Arc::new(SloMetricAnalysisExecutor::new(
            StateType::CompositeSloMetricAnalysis,
            sli_analyzer,
        )));

        registry
    }

    /// Register `executor` under its own stage type.
    pub fn register(&mut self, executor: Arc<dyn StateExecutor>) {
        self.executors.insert(executor.state_type(), executor);
    }

    /// The executor for `state_type`, or `ExecutorNotRegistered`.
    pub fn get(&self, state_type: StateType) -> DomainResult<Arc<dyn StateExecutor>> {
        self.executors
            .get(&state_type)
            .cloned()
            .ok_or_else(|| DomainError::ExecutorNotRegistered(state_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{NeverFailFast, NullSliAnalyzer};

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn statuses(ids: &[Uuid], all: &[LearningEngineTaskStatus]) -> HashMap<Uuid, LearningEngineTaskStatus> {
        ids.iter().copied().zip(all.iter().copied()).collect()
    }

    #[test]
    fn test_all_success_transitions_or_succeeds() {
        use LearningEngineTaskStatus::*;
        let ids = ids(2);
        let map = statuses(&ids, &[Success, Success]);
        assert_eq!(aggregate_worker_statuses(&ids, &map, true), AnalysisStatus::Transition);
        assert_eq!(aggregate_worker_statuses(&ids, &map, false), AnalysisStatus::Success);
    }

    #[test]
    fn test_failure_wins_over_timeout_and_running() {
        use LearningEngineTaskStatus::*;
        let ids = ids(3);
        let map = statuses(&ids, &[Running, Timeout, Failed]);
        assert_eq!(aggregate_worker_statuses(&ids, &map, true), AnalysisStatus::Retry);

        let map = statuses(&ids, &[Running, Timeout, Success]);
        assert_eq!(aggregate_worker_statuses(&ids, &map, true), AnalysisStatus::Timeout);

        let map = statuses(&ids, &[Running, Queued, Success]);
        assert_eq!(aggregate_worker_statuses(&ids, &map, true), AnalysisStatus::Running);
    }

    #[test]
    fn test_missing_worker_counts_as_failed() {
        use LearningEngineTaskStatus::*;
        let ids = ids(2);
        let map = statuses(&ids[..1], &[Success]);
        assert_eq!(aggregate_worker_statuses(&ids, &map, false), AnalysisStatus::Retry);
    }

    #[test]
    fn test_standard_registry_covers_every_stage() {
        let registry = ExecutorRegistry::standard(
            Arc::new(NullSliAnalyzer),
            Arc::new(NeverFailFast),
            FeatureFlags::default(),
        );
        for state_type in StateType::ALL {
            let executor = registry.get(state_type).unwrap();
            assert_eq!(executor.state_type(), state_type);
        }
    }

    #[test]
    fn test_unregistered_stage_is_an_error() {
        let registry = ExecutorRegistry::new();
        let err = registry.get(StateType::SliMetricAnalysis).err().unwrap();
        assert!(matches!(err, DomainError::ExecutorNotRegistered(_)));
    }
}
