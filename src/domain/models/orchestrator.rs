//! Analysis orchestrator domain model.
//!
//! One orchestrator exists per verification entity. It owns the FIFO
//! backlog of state machines that have not started yet; the running
//! machine itself lives in the state machine store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use super::state_machine::AnalysisStateMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorStatus {
    #[default]
    Created,
    Running,
    Waiting,
    Completed,
    Terminated,
}

impl OrchestratorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Completed => "COMPLETED",
            Self::Terminated => "TERMINATED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CREATED" => Some(Self::Created),
            "RUNNING" => Some(Self::Running),
            "WAITING" => Some(Self::Waiting),
            "COMPLETED" => Some(Self::Completed),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// An orchestrator in a terminal status accepts no further windows.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

impl std::fmt::Display for OrchestratorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOrchestrator {
    pub uuid: Uuid,
    pub verification_task_id: String,
    pub account_id: String,
    pub status: OrchestratorStatus,
    /// Backlog in enqueue order.
    pub analysis_state_machine_queue: VecDeque<AnalysisStateMachine>,
    /// Optimistic concurrency version, bumped by every successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AnalysisOrchestrator {
    pub fn new(
        verification_task_id: impl Into<String>,
        account_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            verification_task_id: verification_task_id.into(),
            account_id: account_id.into(),
            status: OrchestratorStatus::Created,
            analysis_state_machine_queue: VecDeque::new(),
            version: 0,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn enqueue(&mut self, machine: AnalysisStateMachine) {
        self.analysis_state_machine_queue.push_back(machine);
    }

    pub fn backlog_len(&self) -> usize {
        self.analysis_state_machine_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AnalysisInput, AnalysisState, StateType};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_backlog_is_fifo() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut orchestrator = AnalysisOrchestrator::new("vt-1", "acct", t0);
        let mut ids = Vec::new();
        for i in 0..3 {
            let start = t0 + Duration::minutes(i);
            let input = AnalysisInput::new("vt-1", start, start + Duration::minutes(1));
            let machine = AnalysisStateMachine::new(
                "vt-1",
                "acct",
                start,
                start + Duration::minutes(1),
                AnalysisState::new(StateType::SliMetricAnalysis, input),
                t0,
            );
            ids.push(machine.uuid);
            orchestrator.enqueue(machine);
        }
        assert_eq!(orchestrator.backlog_len(), 3);
        let drained: Vec<_> = orchestrator
            .analysis_state_machine_queue
            .drain(..)
            .map(|m| m.uuid)
            .collect();
        assert_eq!(drained, ids);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrchestratorStatus::Terminated.is_terminal());
        assert!(OrchestratorStatus::Completed.is_terminal());
        assert!(!OrchestratorStatus::Waiting.is_terminal());
        assert_eq!(OrchestratorStatus::from_str("waiting"), Some(OrchestratorStatus::Waiting));
    }
}
