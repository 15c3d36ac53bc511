//! Analysis state machine domain model.
//!
//! A state machine is the ordered chain of analysis states run for one
//! window of one verification entity. Only the current state is live;
//! finished stages are kept in `completed_states` for inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analysis_state::{AnalysisState, AnalysisStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStateMachine {
    pub uuid: Uuid,
    pub verification_task_id: String,
    pub account_id: String,
    pub analysis_start_time: DateTime<Utc>,
    pub analysis_end_time: DateTime<Utc>,
    pub current_state: AnalysisState,
    #[serde(default)]
    pub completed_states: Vec<AnalysisState>,
    pub status: AnalysisStatus,
    pub total_retry_count: u32,
    /// Earliest instant a state in RETRY may be re-executed.
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AnalysisStateMachine {
    pub fn new(
        verification_task_id: impl Into<String>,
        account_id: impl Into<String>,
        analysis_start_time: DateTime<Utc>,
        analysis_end_time: DateTime<Utc>,
        first_state: AnalysisState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            verification_task_id: verification_task_id.into(),
            account_id: account_id.into(),
            analysis_start_time,
            analysis_end_time,
            current_state: first_state,
            completed_states: Vec::new(),
            status: AnalysisStatus::Created,
            total_retry_count: 0,
            next_attempt_time: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Move the current state to history and install `next`.
    pub fn advance_to(&mut self, next: AnalysisState) {
        let finished = std::mem::replace(&mut self.current_state, next);
        self.completed_states.push(finished);
    }

    /// Close the machine and its current state with the same status.
    pub fn finish(&mut self, status: AnalysisStatus, now: DateTime<Utc>) {
        self.current_state.status = status;
        self.status = status;
        self.next_attempt_time = None;
        self.last_updated_at = now;
    }

    /// Whether the backoff gate allows a retried state to run again.
    pub fn ready_for_retry(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_time.map_or(true, |at| now >= at)
    }
}
