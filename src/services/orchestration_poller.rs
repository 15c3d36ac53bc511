//! Periodic driver for running orchestrators.
//!
//! Every poll interval the poller reaps timed-out worker tasks and ticks each
//! RUNNING orchestrator. Task-complete events tick the affected entity
//! straight away instead of waiting for the next pass.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{OrchestrationConfig, OrchestratorStatus};
use crate::domain::ports::TaskCompleteEvent;
use crate::services::{LearningEngineTaskService, OrchestrationService};

/// Outcome of one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Worker tasks moved to TIMEOUT before ticking.
    pub reaped_tasks: u64,
    pub ticked: usize,
    /// Orchestrators whose tick returned an error.
    pub failed: usize,
    pub waiting: usize,
    pub completed: usize,
    pub terminated: usize,
}

/// Drives every RUNNING orchestrator forward, on a timer and on task events.
pub struct OrchestrationPoller {
    orchestration: Arc<OrchestrationService>,
    tasks: Arc<LearningEngineTaskService>,
    config: OrchestrationConfig,
}

impl OrchestrationPoller {
    /// `config` supplies the poll interval and per-pass concurrency.
    pub fn new(
        orchestration: Arc<OrchestrationService>,
        tasks: Arc<LearningEngineTaskService>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            orchestration,
            tasks,
            config,
        }
    }

    /// One pass over every RUNNING orchestrator.
    ///
    /// A failing orchestrator is logged and counted; it does not stop the pass.
    pub async fn tick(&self) -> DomainResult<TickSummary> {
        let mut summary = TickSummary {
            reaped_tasks: self.tasks.reap_timed_out_tasks().await?,
            ..TickSummary::default()
        };

        let active = self
            .orchestration
            .list_orchestrators(Some(OrchestratorStatus::Running))
            .await?;
        let results: Vec<_> = stream::iter(active)
            .map(|orchestrator| async move {
                let result = self.orchestration.orchestrate(&orchestrator).await;
                (orchestrator.verification_task_id, result)
            })
            .buffer_unordered(self.config.max_concurrent_ticks.max(1))
            .collect()
            .await;

        for (verification_task_id, result) in results {
            summary.ticked += 1;
            match result {
                Ok(orchestrator) => match orchestrator.status {
                    OrchestratorStatus::Waiting => summary.waiting += 1,
                    OrchestratorStatus::Completed => summary.completed += 1,
                    OrchestratorStatus::Terminated => summary.terminated += 1,
                    _ => {}
                },
                Err(e) => {
                    summary.failed += 1;
                    error!(%verification_task_id, error = %e, "orchestrator tick failed");
                }
            }
        }

        debug!(?summary, "poll pass finished");
        Ok(summary)
    }

    /// Poll until `shutdown` flips to true or its sender goes away.
    pub async fn run(
        &self,
        mut events: Option<broadcast::Receiver<TaskCompleteEvent>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> DomainResult<()> {
        let mut timer = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.poll_interval_secs, "orchestration poller started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "poll pass failed");
                    }
                }
                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        if let Err(e) = self.orchestration.orchestrate_by_id(&event.verification_task_id).await {
                            warn!(verification_task_id = %event.verification_task_id, error = %e, "event-driven tick failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "poller lagged behind task events, next pass will catch up");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("task event channel closed");
                        events = None;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("orchestration poller stopped");
        Ok(())
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<TaskCompleteEvent>>,
) -> Result<TaskCompleteEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
