//! Deployment verification stages.
//!
//! Every deployment window starts with host sampling. Log windows that end
//! before the deployment started only build the baseline clusters; later
//! log windows are clustered, analysed against the baseline and optionally
//! sent for feedback. Metric windows go straight to time-series analysis.

use async_trait::async_trait;
use std::sync::Arc;

use super::{StateExecutor, StepContext};
use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisState, LearningEngineTaskType, StateType};
use crate::domain::ports::AnalysisOutcomeInspector;

/// First stage of every deployment window.
#[derive(Debug, Clone)]
pub struct HostSamplingExecutor {
    state_type: StateType,
    task_type: LearningEngineTaskType,
}

impl HostSamplingExecutor {
    /// Log host sampling, routed on by the deployment start time.
    pub fn log() -> Self {
        Self {
            state_type: StateType::DeploymentLogHostSampling,
            task_type: LearningEngineTaskType::LogHostSampling,
        }
    }

    /// Metric host sampling, followed by time-series analysis.
    pub fn metric() -> Self {
        Self {
            state_type: StateType::DeploymentMetricHostSampling,
            task_type: LearningEngineTaskType::MetricHostSampling,
        }
    }
}

#[async_trait]
impl StateExecutor for HostSamplingExecutor {
    fn state_type(&self) -> StateType {
        self.state_type
    }

    async fn execute(&self, state: &mut AnalysisState, ctx: &StepContext<'_>) -> DomainResult<()> {
        let (start, end) = state.inputs.window()?;
        let task = ctx.worker_task(self.task_type, start, end);
        ctx.dispatch(state, vec![task]).await
    }

    fn next_state(&self, state: &AnalysisState, ctx: &StepContext<'_>) -> Option<AnalysisState> {
        let next = match self.state_type {
            StateType::DeploymentMetricHostSampling => StateType::DeploymentTimeSeriesAnalysis,
            _ => {
                let pre_deployment = state
                    .inputs
                    .end_time
                    .is_some_and(|end| ctx.verification_task.is_pre_deployment_window(end));
                if pre_deployment {
                    StateType::PreDeploymentLogCluster
                } else {
                    StateType::DeploymentLogCluster
                }
            }
        };
        Some(AnalysisState::new(next, state.inputs.clone()))
    }
}

/// Deployment analysis stage whose result can end the verification early.
pub struct DeploymentAnalysisExecutor {
    state_type: StateType,
    task_type: LearningEngineTaskType,
    next: Option<StateType>,
    inspector: Arc<dyn AnalysisOutcomeInspector>,
}

impl DeploymentAnalysisExecutor {
    /// Log analysis, followed by feedback when that feature is enabled.
    pub fn log_analysis(inspector: Arc<dyn AnalysisOutcomeInspector>, with_feedback: bool) -> Self {
        Self {
            state_type: StateType::DeploymentLogAnalysis,
            task_type: LearningEngineTaskType::DeploymentLogAnalysis,
            next: with_feedback.then_some(StateType::DeploymentLogFeedback),
            inspector,
        }
    }

    /// Time-series analysis, the last metric stage.
    pub fn time_series(inspector: Arc<dyn AnalysisOutcomeInspector>) -> Self {
        Self {
            state_type: StateType::DeploymentTimeSeriesAnalysis,
            task_type: LearningEngineTaskType::DeploymentTimeSeries,
            next: None,
            inspector,
        }
    }
}

#[async_trait]
impl StateExecutor for DeploymentAnalysisExecutor {
    fn state_type(&self) -> StateType {
        self.state_type
    }

    async fn execute(&self, state: &mut AnalysisState, ctx: &StepContext<'_>) -> DomainResult<()> {
        let (start, end) = state.inputs.window()?;
        let task = ctx.worker_task(self.task_type, start, end);
        ctx.dispatch(state, vec![task]).await
    }

    fn next_state(&self, state: &AnalysisState, _ctx: &StepContext<'_>) -> Option<AnalysisState> {
        self.next
            .map(|next| AnalysisState::new(next, state.inputs.clone()))
    }

    async fn is_fail_fast(&self, state: &AnalysisState, _ctx: &StepContext<'_>) -> DomainResult<bool> {
        self.inspector.should_fail_fast(&state.inputs).await
    }
}
