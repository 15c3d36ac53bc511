//! State machine event publisher port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::LearningEngineTaskStatus;

/// Emitted when a worker task reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleteEvent {
    pub account_id: String,
    pub verification_task_id: String,
    pub learning_engine_task_id: Uuid,
    pub status: LearningEngineTaskStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Notifies whoever ticks orchestrators that an entity has news.
#[async_trait]
pub trait StateMachineEventPublisher: Send + Sync {
    async fn register_task_complete(&self, event: TaskCompleteEvent) -> DomainResult<()>;
}

/// Publisher that drops every event. The poller picks changes up on its
/// next periodic pass instead.
#[derive(Debug, Clone, Default)]
pub struct NullEventPublisher;

#[async_trait]
impl StateMachineEventPublisher for NullEventPublisher {
    async fn register_task_complete(&self, _event: TaskCompleteEvent) -> DomainResult<()> {
        Ok(())
    }
}
