//! SLI and composite SLO stages.
//!
//! These run in-process: `execute` computes the result straight away and no
//! worker task is ever queued.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{synchronous_status, StateExecutor, StepContext};
use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisState, AnalysisStatus, StateType};
use crate::domain::ports::SliAnalyzer;

/// Runs an SLI analysis for the window inside the step itself.
pub struct SloMetricAnalysisExecutor {
    state_type: StateType,
    analyzer: Arc<dyn SliAnalyzer>,
}

impl SloMetricAnalysisExecutor {
    pub fn new(state_type: StateType, analyzer: Arc<dyn SliAnalyzer>) -> Self {
        Self {
            state_type,
            analyzer,
        }
    }
}

#[async_trait]
impl StateExecutor for SloMetricAnalysisExecutor {
    fn state_type(&self) -> StateType {
        self.state_type
    }

    async fn execute(&self, state: &mut AnalysisState, ctx: &StepContext<'_>) -> DomainResult<()> {
        state.started_at = Some(ctx.now);
        state.status = match self.analyzer.analyze(self.state_type, &state.inputs).await {
            Ok(()) => AnalysisStatus::Success,
            Err(e) => {
                warn!(
                    state_type = %self.state_type,
                    verification_task_id = %state.inputs.verification_task_id,
                    error = %e,
                    "slo analysis failed"
                );
                AnalysisStatus::Failed
            }
        };
        Ok(())
    }

    fn next_state(&self, _state: &AnalysisState, _ctx: &StepContext<'_>) -> Option<AnalysisState> {
        None
    }

    async fn get_execution_status(
        &self,
        state: &AnalysisState,
        ctx: &StepContext<'_>,
    ) -> DomainResult<AnalysisStatus> {
        Ok(synchronous_status(state, self.next_state(state, ctx).is_some()))
    }
}
