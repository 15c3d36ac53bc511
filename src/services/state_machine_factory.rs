//! Picks the pipeline for a verification task.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisInput, AnalysisState, AnalysisStateMachine, ClusterLevel, DataSourceKind, StateType,
    VerificationTask, VerificationTaskType,
};

/// Builds the first stage of a pipeline.
pub type PipelineBuilder = fn(&VerificationTask, &AnalysisInput) -> AnalysisState;

/// Table from verification task type to pipeline.
#[derive(Clone, Default)]
pub struct StateMachineFactory {
    builders: HashMap<VerificationTaskType, PipelineBuilder>,
}

impl StateMachineFactory {
    /// A factory with no pipelines.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipelines for every verification task type.
    pub fn standard() -> Self {
        let mut factory = Self::new();
        factory.register(VerificationTaskType::LiveMonitoring, live_monitoring_pipeline);
        factory.register(VerificationTaskType::Deployment, deployment_pipeline);
        factory.register(VerificationTaskType::Sli, sli_pipeline);
        factory.register(VerificationTaskType::CompositeSlo, composite_slo_pipeline);
        factory
    }

    /// Use `builder` for `task_type`, replacing any earlier one.
    pub fn register(&mut self, task_type: VerificationTaskType, builder: PipelineBuilder) {
        self.builders.insert(task_type, builder);
    }

    /// A CREATED machine for `input`'s window with its first stage set.
    pub fn create(
        &self,
        verification_task: &VerificationTask,
        input: &AnalysisInput,
        now: DateTime<Utc>,
    ) -> DomainResult<AnalysisStateMachine> {
        let (start, end) = input.window()?;
        let builder = self.builders.get(&verification_task.task_type).ok_or_else(|| {
            DomainError::ValidationFailed(format!(
                "no pipeline for verification task type {}",
                verification_task.task_type.as_str()
            ))
        })?;

        let mut input = input.clone();
        if input.verification_job_instance_id.is_none() {
            input.verification_job_instance_id = verification_task.verification_job_instance_id.clone();
        }
        let first_state = builder(verification_task, &input);

        Ok(AnalysisStateMachine::new(
            &verification_task.id,
            &verification_task.account_id,
            start,
            end,
            first_state,
            now,
        ))
    }
}

fn live_monitoring_pipeline(_task: &VerificationTask, input: &AnalysisInput) -> AnalysisState {
    AnalysisState::new(StateType::ServiceGuardLogCluster, input.clone()).with_cluster_level(ClusterLevel::L1)
}

fn deployment_pipeline(task: &VerificationTask, input: &AnalysisInput) -> AnalysisState {
    let first = match task.data_kind {
        DataSourceKind::Log => StateType::DeploymentLogHostSampling,
        DataSourceKind::Metric => StateType::DeploymentMetricHostSampling,
    };
    AnalysisState::new(first, input.clone())
}

fn sli_pipeline(_task: &VerificationTask, input: &AnalysisInput) -> AnalysisState {
    AnalysisState::new(StateType::SliMetricAnalysis, input.clone())
}

fn composite_slo_pipeline(_task: &VerificationTask, input: &AnalysisInput) -> AnalysisState {
    AnalysisState::new(StateType::CompositeSloMetricAnalysis, input.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn first_state(task: VerificationTask) -> AnalysisState {
        let input = AnalysisInput::new(&task.id, t0(), t0() + Duration::minutes(5));
        StateMachineFactory::standard()
            .create(&task, &input, t0())
            .unwrap()
            .current_state
    }

    #[test]
    fn test_pipelines_by_task_type() {
        let live = first_state(VerificationTask::new("vt", "acct", VerificationTaskType::LiveMonitoring, t0()));
        assert_eq!(live.state_type, StateType::ServiceGuardLogCluster);
        assert_eq!(live.cluster_level, Some(ClusterLevel::L1));

        let log = first_state(VerificationTask::new("vt", "acct", VerificationTaskType::Deployment, t0()));
        assert_eq!(log.state_type, StateType::DeploymentLogHostSampling);

        let metric = first_state(
            VerificationTask::new("vt", "acct", VerificationTaskType::Deployment, t0())
                .with_data_kind(DataSourceKind::Metric),
        );
        assert_eq!(metric.state_type, StateType::DeploymentMetricHostSampling);

        let sli = first_state(VerificationTask::new("vt", "acct", VerificationTaskType::Sli, t0()));
        assert_eq!(sli.state_type, StateType::SliMetricAnalysis);

        let slo = first_state(VerificationTask::new("vt", "acct", VerificationTaskType::CompositeSlo, t0()));
        assert_eq!(slo.state_type, StateType::CompositeSloMetricAnalysis);
    }

    #[test]
    fn test_machine_carries_window_and_job_instance() {
        let task = VerificationTask::new("vt", "acct", VerificationTaskType::Deployment, t0())
            .with_job_instance("job-1");
        let input = AnalysisInput::new("vt", t0(), t0() + Duration::minutes(1));
        let machine = StateMachineFactory::standard().create(&task, &input, t0()).unwrap();

        assert_eq!(machine.analysis_start_time, t0());
        assert_eq!(machine.analysis_end_time, t0() + Duration::minutes(1));
        assert_eq!(machine.account_id, "acct");
        assert_eq!(
            machine.current_state.inputs.verification_job_instance_id.as_deref(),
            Some("job-1")
        );
    }

    #[test]
    fn test_unregistered_type_is_rejected() {
        let task = VerificationTask::new("vt", "acct", VerificationTaskType::Sli, t0());
        let input = AnalysisInput::new("vt", t0(), t0() + Duration::minutes(1));
        let err = StateMachineFactory::new().create(&task, &input, t0()).unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }
}
