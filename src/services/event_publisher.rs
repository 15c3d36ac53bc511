//! In-process task-complete notifications.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{StateMachineEventPublisher, TaskCompleteEvent};

const DEFAULT_CAPACITY: usize = 1024;

/// Fans task-complete events out to every subscribed poller.
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// dropped and the periodic tick picks the change up instead.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<TaskCompleteEvent>,
}

impl BroadcastEventPublisher {
    /// Subscribers lagging more than `capacity` events behind lose the oldest.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskCompleteEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl StateMachineEventPublisher for BroadcastEventPublisher {
    async fn register_task_complete(&self, event: TaskCompleteEvent) -> DomainResult<()> {
        let verification_task_id = event.verification_task_id.clone();
        if self.sender.send(event).is_err() {
            debug!(%verification_task_id, "no subscribers for task-complete event");
        }
        Ok(())
    }
}
