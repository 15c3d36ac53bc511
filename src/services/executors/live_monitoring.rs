//! Live monitoring log clustering.
//!
//! Clustering runs in two passes over the same window. L1 clusters each
//! minute separately; L2 merges the minute clusters for the whole window.

use async_trait::async_trait;
use chrono::Duration;

use super::{StateExecutor, StepContext};
use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisState, ClusterLevel, LearningEngineTaskType, StateType};

/// L1 then L2 log clustering for live monitoring windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceGuardLogClusterExecutor;

#[async_trait]
impl StateExecutor for ServiceGuardLogClusterExecutor {
    fn state_type(&self) -> StateType {
        StateType::ServiceGuardLogCluster
    }

    async fn execute(&self, state: &mut AnalysisState, ctx: &StepContext<'_>) -> DomainResult<()> {
        let (start, end) = state.inputs.window()?;
        let tasks = match state.cluster_level.unwrap_or(ClusterLevel::L1) {
            ClusterLevel::L1 => {
                let mut tasks = Vec::new();
                let mut minute_start = start;
                while minute_start < end {
                    let minute_end = (minute_start + Duration::minutes(1)).min(end);
                    tasks.push(ctx.worker_task(LearningEngineTaskType::LogCluster, minute_start, minute_end));
                    minute_start = minute_end;
                }
                tasks
            }
            ClusterLevel::L2 => vec![ctx.worker_task(LearningEngineTaskType::LogCluster, start, end)],
        };
        ctx.dispatch(state, tasks).await
    }

    fn next_state(&self, state: &AnalysisState, _ctx: &StepContext<'_>) -> Option<AnalysisState> {
        let next = match state.cluster_level.unwrap_or(ClusterLevel::L1) {
            ClusterLevel::L1 => AnalysisState::new(StateType::ServiceGuardLogCluster, state.inputs.clone())
                .with_cluster_level(ClusterLevel::L2),
            ClusterLevel::L2 => AnalysisState::new(StateType::ServiceGuardLogAnalysis, state.inputs.clone()),
        };
        Some(next)
    }
}
