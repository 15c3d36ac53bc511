use async_trait::async_trait;

use super::{StateExecutor, StepContext};
use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisState, LearningEngineTaskType, StateType};

/// A stage that hands the whole window to one learning engine worker.
#[derive(Debug, Clone)]
pub struct WorkerStageExecutor {
    state_type: StateType,
    task_type: LearningEngineTaskType,
    next: Option<StateType>,
}

impl WorkerStageExecutor {
    /// A stage of `state_type` queuing one `task_type` worker, then moving to `next`.
    pub fn new(state_type: StateType, task_type: LearningEngineTaskType, next: Option<StateType>) -> Self {
        Self {
            state_type,
            task_type,
            next,
        }
    }
}

#[async_trait]
impl StateExecutor for WorkerStageExecutor {
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
}
