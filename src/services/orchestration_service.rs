//! Per-entity orchestration.
//!
//! Each verification task owns one orchestrator holding a FIFO backlog of
//! analysis windows. At most one window's state machine runs at a time; the
//! orchestrator starts the next window when the current one finishes,
//! discards windows that have gone stale, and terminates the whole entity
//! when a window fails.
//!
//! Starting a window is claimed through the entity's single RUNNING slot in
//! the state machine store. Orchestrator writes are guarded by a version
//! column; a write that loses a race is reapplied to a fresh copy.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisInput, AnalysisOrchestrator, AnalysisStateMachine, AnalysisStatus, ExecutionStatus,
    OrchestrationConfig, OrchestratorStatus, VerificationStatus, VerificationTask,
};
use crate::domain::ports::{
    AnalysisOrchestratorRepository, Clock, VerificationJobInstanceRepository,
    VerificationTaskRepository,
};
use crate::services::AnalysisStateMachineService;

/// Owns the per-entity orchestrators and their window backlogs.
pub struct OrchestrationService {
    orchestrators: Arc<dyn AnalysisOrchestratorRepository>,
    verification_tasks: Arc<dyn VerificationTaskRepository>,
    job_instances: Arc<dyn VerificationJobInstanceRepository>,
    state_machines: Arc<AnalysisStateMachineService>,
    clock: Arc<dyn Clock>,
    config: OrchestrationConfig,
}

impl OrchestrationService {
    /// Build the service over its stores and the state machine service.
    pub fn new(
        orchestrators: Arc<dyn AnalysisOrchestratorRepository>,
        verification_tasks: Arc<dyn VerificationTaskRepository>,
        job_instances: Arc<dyn VerificationJobInstanceRepository>,
        state_machines: Arc<AnalysisStateMachineService>,
        clock: Arc<dyn Clock>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            orchestrators,
            verification_tasks,
            job_instances,
            state_machines,
            clock,
            config,
        }
    }

    /// Accept one analysis window for an entity.
    ///
    /// The first window starts immediately. Later windows join the backlog
    /// behind whatever is running. Windows for a terminated or completed
    /// entity are dropped. Invalid input is rejected before anything is
    /// written.
    #[instrument(skip(self, input), fields(verification_task_id = %input.verification_task_id), err)]
    pub async fn queue_analysis(&self, input: AnalysisInput) -> DomainResult<()> {
        input.validate()?;
        let machine = self.state_machines.create_state_machine(&input).await?;
        let verification_task_id = input.verification_task_id.clone();
        self.with_conflict_retry(&verification_task_id, || self.try_queue(machine.clone()))
            .await
    }

    /// Advance an orchestrator by one tick and return its new state.
    #[instrument(skip(self, orchestrator), fields(verification_task_id = %orchestrator.verification_task_id), err)]
    pub async fn orchestrate(&self, orchestrator: &AnalysisOrchestrator) -> DomainResult<AnalysisOrchestrator> {
        let mut current = orchestrator.clone();
        if current.status.is_terminal() {
            return Ok(current);
        }
        let verification_task_id = current.verification_task_id.clone();

        let stepped = self.state_machines.execute_state_machine(&verification_task_id).await?;
        if stepped.as_ref().is_some_and(|m| !m.is_final()) {
            return Ok(current);
        }
        if current.status == OrchestratorStatus::Waiting && current.analysis_state_machine_queue.is_empty() {
            return Ok(current);
        }

        let last = match stepped {
            Some(machine) => Some(machine),
            None => self.state_machines.find_latest_final(&verification_task_id).await?,
        };
        let verification_task = self.load_verification_task(&verification_task_id).await?;

        let result = match last.as_ref().filter(|m| m.status.is_failing()) {
            Some(failed) => self.terminate(&mut current, failed, &verification_task).await,
            None => self.advance_backlog(&mut current, last.as_ref(), &verification_task).await,
        };

        match result {
            Ok(()) => Ok(current),
            Err(e) if e.is_conflict() => {
                debug!("orchestrator changed concurrently, abandoning tick");
                self.orchestrators
                    .get(&verification_task_id)
                    .await?
                    .ok_or(DomainError::OrchestratorNotFound(verification_task_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Load and tick an entity's orchestrator, if it has one.
    pub async fn orchestrate_by_id(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisOrchestrator>> {
        match self.orchestrators.get(verification_task_id).await? {
            Some(orchestrator) => self.orchestrate(&orchestrator).await.map(Some),
            None => Ok(None),
        }
    }

    /// The entity's orchestrator, if it has one.
    pub async fn get_analysis_orchestrator(
        &self,
        verification_task_id: &str,
    ) -> DomainResult<Option<AnalysisOrchestrator>> {
        self.orchestrators.get(verification_task_id).await
    }

    /// All orchestrators, optionally only those with `status`.
    pub async fn list_orchestrators(
        &self,
        status: Option<OrchestratorStatus>,
    ) -> DomainResult<Vec<AnalysisOrchestrator>> {
        self.orchestrators.list(status).await
    }

    /// Shut an entity down for good.
    ///
    /// The backlog and any running window are IGNORED and the orchestrator
    /// becomes COMPLETED. Already terminal orchestrators are returned as is.
    #[instrument(skip(self), err)]
    pub async fn mark_completed(&self, verification_task_id: &str) -> DomainResult<AnalysisOrchestrator> {
        self.with_conflict_retry(verification_task_id, || self.try_complete(verification_task_id))
            .await
    }

    async fn try_queue(&self, machine: AnalysisStateMachine) -> DomainResult<()> {
        let verification_task_id = machine.verification_task_id.clone();
        let now = self.clock.now();

        let Some(mut orchestrator) = self.orchestrators.get(&verification_task_id).await? else {
            let mut orchestrator = AnalysisOrchestrator::new(&verification_task_id, &machine.account_id, now);
            orchestrator.status = OrchestratorStatus::Running;
            match self
                .state_machines
                .initiate_state_machine(&verification_task_id, machine.clone())
                .await
            {
                Ok(_) => info!("first window started"),
                Err(e) if e.is_conflict() => orchestrator.enqueue(machine),
                Err(e) => {
                    if !self.state_machines.is_persisted(machine.uuid).await? {
                        return Err(e);
                    }
                    // The machine holds the running slot; a tick re-dispatches it.
                    warn!(machine_id = %machine.uuid, error = %e, "first window stored but not dispatched");
                }
            }
            return self.orchestrators.insert(&orchestrator).await;
        };

        match orchestrator.status {
            OrchestratorStatus::Terminated | OrchestratorStatus::Completed => {
                info!(
                    status = %orchestrator.status,
                    start = %machine.analysis_start_time,
                    "orchestrator is closed, dropping window"
                );
                return Ok(());
            }
            OrchestratorStatus::Created | OrchestratorStatus::Waiting => {
                orchestrator.status = OrchestratorStatus::Running;
            }
            OrchestratorStatus::Running => {}
        }

        orchestrator.enqueue(machine);
        orchestrator.last_updated_at = now;
        self.orchestrators.update(&mut orchestrator).await?;
        debug!(backlog = orchestrator.backlog_len(), "window queued");
        Ok(())
    }

    async fn terminate(
        &self,
        orchestrator: &mut AnalysisOrchestrator,
        cause: &AnalysisStateMachine,
        verification_task: &VerificationTask,
    ) -> DomainResult<()> {
        // Every write before the orchestrator's is safe to repeat; a later
        // tick redoes the whole cascade until the orchestrator is closed.
        let (execution, verification) = match cause.status {
            AnalysisStatus::Terminated => (ExecutionStatus::Success, VerificationStatus::VerificationFailed),
            _ => (ExecutionStatus::Failed, VerificationStatus::Error),
        };
        self.update_job_instance(verification_task, cause, execution, verification)
            .await?;

        let mut drained: Vec<AnalysisStateMachine> =
            orchestrator.analysis_state_machine_queue.iter().cloned().collect();
        self.state_machines
            .close_state_machines(&mut drained, AnalysisStatus::Terminated)
            .await?;

        orchestrator.analysis_state_machine_queue.clear();
        orchestrator.status = OrchestratorStatus::Terminated;
        orchestrator.last_updated_at = self.clock.now();
        self.orchestrators.update(orchestrator).await?;

        warn!(
            cause = %cause.uuid,
            cause_status = %cause.status,
            dropped = drained.len(),
            "orchestrator terminated"
        );
        Ok(())
    }

    async fn advance_backlog(
        &self,
        orchestrator: &mut AnalysisOrchestrator,
        last: Option<&AnalysisStateMachine>,
        verification_task: &VerificationTask,
    ) -> DomainResult<()> {
        let verification_task_id = orchestrator.verification_task_id.clone();
        let mut ignored = Vec::new();
        let mut settled = Vec::new();
        let mut started = None;
        for candidate in orchestrator.analysis_state_machine_queue.iter() {
            if ignored.len() >= self.config.state_machine_ignore_limit {
                break;
            }
            if self.state_machines.ignore_old_state_machine(candidate) {
                settled.push(candidate.uuid);
                ignored.push(candidate.clone());
            } else if self.state_machines.is_persisted(candidate.uuid).await? {
                // Started by a tick whose orchestrator write never landed.
                settled.push(candidate.uuid);
            } else {
                let machine = self
                    .state_machines
                    .initiate_state_machine(&verification_task_id, candidate.clone())
                    .await?;
                settled.push(machine.uuid);
                started = Some(machine);
                break;
            }
        }

        let covered = last.is_some_and(|m| verification_task.deployment_covered_by(m.analysis_end_time));
        let committed = self
            .commit_backlog(orchestrator, &settled, started.is_some(), covered)
            .await?;

        if !ignored.is_empty() {
            warn!(count = ignored.len(), "stale windows ignored");
            self.state_machines
                .close_state_machines(&mut ignored, AnalysisStatus::Ignored)
                .await?;
        }

        if let Some(started) = &started {
            debug!(machine_id = %started.uuid, backlog = orchestrator.backlog_len(), "next window started");
        }

        if let (true, OrchestratorStatus::Completed, Some(last)) = (committed, orchestrator.status, last) {
            self.update_job_instance(
                verification_task,
                last,
                ExecutionStatus::Success,
                VerificationStatus::VerificationPassed,
            )
            .await?;
            info!("deployment verified, orchestrator completed");
        }
        Ok(())
    }

    /// Drop `settled` windows from the backlog and persist the new status.
    ///
    /// Returns false when the orchestrator was closed by another caller in
    /// the meantime.
    async fn commit_backlog(
        &self,
        orchestrator: &mut AnalysisOrchestrator,
        settled: &[Uuid],
        started: bool,
        covered: bool,
    ) -> DomainResult<bool> {
        let mut attempt = 0;
        loop {
            orchestrator
                .analysis_state_machine_queue
                .retain(|m| !settled.contains(&m.uuid));
            orchestrator.status = if started || !orchestrator.analysis_state_machine_queue.is_empty() {
                OrchestratorStatus::Running
            } else if covered {
                OrchestratorStatus::Completed
            } else {
                OrchestratorStatus::Waiting
            };
            orchestrator.last_updated_at = self.clock.now();

            match self.orchestrators.update(orchestrator).await {
                Ok(()) => return Ok(true),
                Err(e) if e.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    let id = orchestrator.verification_task_id.clone();
                    let fresh = self
                        .orchestrators
                        .get(&id)
                        .await?
                        .ok_or(DomainError::OrchestratorNotFound(id))?;
                    debug!(attempt, version = fresh.version, "orchestrator moved on, reapplying backlog change");
                    *orchestrator = fresh;
                    if orchestrator.status.is_terminal() {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_complete(&self, verification_task_id: &str) -> DomainResult<AnalysisOrchestrator> {
        let mut orchestrator = self
            .orchestrators
            .get(verification_task_id)
            .await?
            .ok_or_else(|| DomainError::OrchestratorNotFound(verification_task_id.to_string()))?;
        if orchestrator.status.is_terminal() {
            return Ok(orchestrator);
        }

        let mut drained: Vec<AnalysisStateMachine> =
            orchestrator.analysis_state_machine_queue.iter().cloned().collect();
        if let Some(running) = self.state_machines.find_running(verification_task_id).await? {
            drained.push(running);
        }
        self.state_machines
            .close_state_machines(&mut drained, AnalysisStatus::Ignored)
            .await?;

        orchestrator.analysis_state_machine_queue.clear();
        orchestrator.status = OrchestratorStatus::Completed;
        orchestrator.last_updated_at = self.clock.now();
        self.orchestrators.update(&mut orchestrator).await?;

        info!(ignored = drained.len(), "orchestrator completed");
        Ok(orchestrator)
    }

    async fn update_job_instance(
        &self,
        verification_task: &VerificationTask,
        machine: &AnalysisStateMachine,
        execution: ExecutionStatus,
        verification: VerificationStatus,
    ) -> DomainResult<()> {
        let job_instance_id = verification_task
            .verification_job_instance_id
            .as_deref()
            .or(machine.current_state.inputs.verification_job_instance_id.as_deref());
        let Some(job_instance_id) = job_instance_id else {
            return Ok(());
        };

        match self
            .job_instances
            .update_status(job_instance_id, execution, Some(verification), self.clock.now())
            .await
        {
            Ok(()) => {
                info!(
                    job_instance_id,
                    execution_status = execution.as_str(),
                    verification_status = verification.as_str(),
                    "job instance updated"
                );
                Ok(())
            }
            Err(DomainError::JobInstanceNotFound(id)) => {
                warn!(job_instance_id = %id, "job instance missing, status not recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run `op` again while it reports conflicts, backing off between tries.
    async fn with_conflict_retry<T, F, Fut>(&self, id: &str, mut op: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut backoff = conflict_backoff();
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(StdDuration::from_millis(100));
                    debug!(
                        id,
                        attempt,
                        max_retries = self.config.conflict_retries,
                        "concurrent update, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn load_verification_task(&self, id: &str) -> DomainResult<VerificationTask> {
        self.verification_tasks
            .get(id)
            .await?
            .ok_or_else(|| DomainError::VerificationTaskNotFound(id.to_string()))
    }
}

fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(StdDuration::from_millis(10))
        .with_max_interval(StdDuration::from_millis(200))
        .with_max_elapsed_time(None)
        .build()
}
