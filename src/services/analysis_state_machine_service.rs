//! Drives one analysis window through its pipeline.
//!
//! A state machine is stepped once per orchestrator tick. Each step reads
//! the status of the current stage, applies the matching executor hook and
//! persists the machine. Retries are gated by an exponential backoff kept in
//! `next_attempt_time`; a stage that keeps failing is settled as FAILED for
//! deployments and IGNORED for everything else.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisInput, AnalysisStateMachine, AnalysisStatus, OrchestrationConfig, VerificationTask,
};
use crate::domain::ports::{AnalysisStateMachineRepository, Clock, VerificationTaskRepository};
use crate::services::executors::{ExecutorRegistry, StateExecutor, StepContext};
use crate::services::{LearningEngineTaskService, StateMachineFactory};

/// Creates, starts and steps analysis state machines.
///
/// Stage work is delegated to the executor registered for each stage type.
pub struct AnalysisStateMachineService {
    machines: Arc<dyn AnalysisStateMachineRepository>,
    verification_tasks: Arc<dyn VerificationTaskRepository>,
    tasks: Arc<LearningEngineTaskService>,
    executors: ExecutorRegistry,
    factory: StateMachineFactory,
    clock: Arc<dyn Clock>,
    config: OrchestrationConfig,
}

impl AnalysisStateMachineService {
    /// Build the service. `config` supplies the retry and staleness limits.
    pub fn new(
        machines: Arc<dyn AnalysisStateMachineRepository>,
        verification_tasks: Arc<dyn VerificationTaskRepository>,
        tasks: Arc<LearningEngineTaskService>,
        executors: ExecutorRegistry,
        factory: StateMachineFactory,
        clock: Arc<dyn Clock>,
        config: OrchestrationConfig,
    ) -> Self {
        Self {
            machines,
            verification_tasks,
            tasks,
            executors,
            factory,
            clock,
            config,
        }
    }

    /// Build an unsaved CREATED machine for one window.
    pub async fn create_state_machine(&self, input: &AnalysisInput) -> DomainResult<AnalysisStateMachine> {
        input.validate()?;
        let verification_task = self.load_verification_task(&input.verification_task_id).await?;
        self.factory.create(&verification_task, input, self.clock.now())
    }

    /// Start `machine` as the entity's running machine.
    ///
    /// Fails with `ConcurrencyConflict` when another machine is already
    /// running for the entity or this machine was started before; nothing
    /// is written in that case.
    #[instrument(skip(self, machine), fields(machine_id = %machine.uuid), err)]
    pub async fn initiate_state_machine(
        &self,
        verification_task_id: &str,
        mut machine: AnalysisStateMachine,
    ) -> DomainResult<AnalysisStateMachine> {
        if let Some(running) = self.machines.find_running(verification_task_id).await? {
            debug!(running = %running.uuid, "entity already has a running state machine");
            return Err(DomainError::ConcurrencyConflict {
                entity: "AnalysisStateMachine".to_string(),
                id: verification_task_id.to_string(),
            });
        }

        let verification_task = self.load_verification_task(verification_task_id).await?;
        let now = self.clock.now();
        machine.status = AnalysisStatus::Running;
        machine.current_state.status = AnalysisStatus::Created;
        machine.next_attempt_time = None;
        machine.last_updated_at = now;
        // Claim the running slot before dispatching any work.
        self.machines.insert(&machine).await?;

        let ctx = self.context(&verification_task, now);
        let executor = self.executors.get(machine.current_state.state_type)?;
        executor.execute(&mut machine.current_state, &ctx).await?;
        self.machines.save(&machine).await?;

        info!(
            state_type = %machine.current_state.state_type,
            start = %machine.analysis_start_time,
            end = %machine.analysis_end_time,
            "state machine started"
        );
        Ok(machine)
    }

    /// Step the entity's running machine once.
    ///
    /// Returns the stepped machine, or `None` when nothing is running.
    #[instrument(skip(self), err)]
    pub async fn execute_state_machine(
        &self,
        verification_task_id: &str,
    ) -> DomainResult<Option<AnalysisStateMachine>> {
        let Some(mut machine) = self.machines.find_running(verification_task_id).await? else {
            return Ok(None);
        };
        let verification_task = self.load_verification_task(verification_task_id).await?;
        self.step(&mut machine, &verification_task).await?;
        self.machines.save(&machine).await?;
        Ok(Some(machine))
    }

    /// Re-dispatch a failed stage once its backoff has elapsed.
    ///
    /// Returns whether the stage was rerun. The machine is not saved.
    pub async fn retry_state_machine_after_failure(
        &self,
        machine: &mut AnalysisStateMachine,
    ) -> DomainResult<bool> {
        let verification_task = self.load_verification_task(&machine.verification_task_id).await?;
        let ctx = self.context(&verification_task, self.clock.now());
        self.rerun_when_due(machine, &ctx).await
    }

    /// Whether a queued window is too old to be worth analysing.
    pub fn ignore_old_state_machine(&self, machine: &AnalysisStateMachine) -> bool {
        let horizon = self.clock.now() - Duration::minutes(self.config.state_machine_ignore_minutes);
        machine.analysis_end_time < horizon
    }

    /// Settle `machines` with `status` and persist them together.
    ///
    /// Unfinished workers of the closed stages are failed afterwards.
    pub async fn close_state_machines(
        &self,
        machines: &mut [AnalysisStateMachine],
        status: AnalysisStatus,
    ) -> DomainResult<()> {
        let now = self.clock.now();
        for machine in machines.iter_mut() {
            machine.finish(status, now);
        }
        self.machines.save_all(machines).await?;

        let workers: Vec<Uuid> = machines
            .iter()
            .flat_map(|m| m.current_state.worker_task_ids.iter().copied())
            .collect();
        self.tasks.abandon_tasks(&workers, "analysis closed").await?;
        Ok(())
    }

    /// Whether a backlog entry already reached the store.
    pub async fn is_persisted(&self, uuid: Uuid) -> DomainResult<bool> {
        Ok(self.machines.get(uuid).await?.is_some())
    }

    /// The entity's RUNNING machine, if any.
    pub async fn find_running(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisStateMachine>> {
        self.machines.find_running(verification_task_id).await
    }

    /// The entity's most recently finished machine that actually ran.
    pub async fn find_latest_final(
        &self,
        verification_task_id: &str,
    ) -> DomainResult<Option<AnalysisStateMachine>> {
        self.machines.find_latest_final(verification_task_id).await
    }

    /// Every persisted machine of the entity, oldest window first.
    pub async fn list_state_machines(&self, verification_task_id: &str) -> DomainResult<Vec<AnalysisStateMachine>> {
        self.machines.list_by_verification_task(verification_task_id).await
    }

    async fn step(
        &self,
        machine: &mut AnalysisStateMachine,
        verification_task: &VerificationTask,
    ) -> DomainResult<()> {
        let now = self.clock.now();
        let ctx = self.context(verification_task, now);
        let executor = self.executors.get(machine.current_state.state_type)?;

        match machine.current_state.status {
            AnalysisStatus::Retry => {
                self.rerun_when_due(machine, &ctx).await?;
                return Ok(());
            }
            AnalysisStatus::Created => {
                // Started but never dispatched.
                executor.execute(&mut machine.current_state, &ctx).await?;
                machine.last_updated_at = now;
                return Ok(());
            }
            _ => {}
        }

        let status = executor.get_execution_status(&machine.current_state, &ctx).await?;
        match status {
            AnalysisStatus::Created | AnalysisStatus::Running => {
                executor.handle_running(&mut machine.current_state);
            }
            AnalysisStatus::Success => {
                if executor.is_fail_fast(&machine.current_state, &ctx).await? {
                    self.terminate(machine, now);
                } else {
                    let status = executor.handle_success(&mut machine.current_state);
                    machine.finish(status, now);
                    info!(machine_id = %machine.uuid, "state machine succeeded");
                }
            }
            AnalysisStatus::Transition => {
                if executor.is_fail_fast(&machine.current_state, &ctx).await? {
                    self.terminate(machine, now);
                } else {
                    let mut next = executor.handle_transition(&mut machine.current_state, &ctx)?;
                    let next_executor = self.executors.get(next.state_type)?;
                    next_executor.execute(&mut next, &ctx).await?;
                    debug!(
                        machine_id = %machine.uuid,
                        from = %machine.current_state.state_type,
                        to = %next.state_type,
                        "stage transition"
                    );
                    machine.advance_to(next);
                }
            }
            AnalysisStatus::Retry | AnalysisStatus::Timeout | AnalysisStatus::Failed => {
                self.handle_failed_attempt(machine, executor.as_ref(), verification_task, now)
                    .await?;
            }
            AnalysisStatus::Ignored | AnalysisStatus::Terminated => {
                machine.finish(status, now);
            }
        }

        machine.last_updated_at = now;
        Ok(())
    }

    async fn handle_failed_attempt(
        &self,
        machine: &mut AnalysisStateMachine,
        executor: &dyn StateExecutor,
        verification_task: &VerificationTask,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        // Siblings of a failed worker are never read.
        self.tasks
            .abandon_tasks(&machine.current_state.worker_task_ids, "sibling worker failed")
            .await?;
        if machine.current_state.retry_count + 1 < self.config.max_retry_count {
            executor.handle_retry(&mut machine.current_state);
            let next_attempt = now + self.retry_delay(machine.total_retry_count);
            machine.total_retry_count += 1;
            machine.next_attempt_time = Some(next_attempt);
            warn!(
                machine_id = %machine.uuid,
                state_type = %machine.current_state.state_type,
                retry_count = machine.current_state.retry_count,
                next_attempt = %next_attempt,
                "stage failed, retry scheduled"
            );
        } else {
            let status = executor.handle_final_statuses(&mut machine.current_state, verification_task.task_type);
            machine.finish(status, now);
            warn!(
                machine_id = %machine.uuid,
                state_type = %machine.current_state.state_type,
                status = %status,
                "stage out of retries"
            );
        }
        Ok(())
    }

    async fn rerun_when_due(
        &self,
        machine: &mut AnalysisStateMachine,
        ctx: &StepContext<'_>,
    ) -> DomainResult<bool> {
        if !machine.ready_for_retry(ctx.now) {
            debug!(machine_id = %machine.uuid, "retry not due yet");
            return Ok(false);
        }
        let executor = self.executors.get(machine.current_state.state_type)?;
        executor.handle_rerun(&mut machine.current_state, ctx).await?;
        machine.next_attempt_time = None;
        machine.last_updated_at = ctx.now;
        info!(
            machine_id = %machine.uuid,
            state_type = %machine.current_state.state_type,
            retry_count = machine.current_state.retry_count,
            "stage rerun"
        );
        Ok(true)
    }

    fn terminate(&self, machine: &mut AnalysisStateMachine, now: DateTime<Utc>) {
        warn!(
            machine_id = %machine.uuid,
            state_type = %machine.current_state.state_type,
            "analysis failed fast, terminating"
        );
        machine.finish(AnalysisStatus::Terminated, now);
    }

    /// `initial * 2^attempt`, capped.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let secs = self
            .config
            .initial_backoff_secs
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.max_backoff_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }

    fn context<'a>(&'a self, verification_task: &'a VerificationTask, now: DateTime<Utc>) -> StepContext<'a> {
        StepContext {
            verification_task,
            tasks: &self.tasks,
            now,
        }
    }

    async fn load_verification_task(&self, id: &str) -> DomainResult<VerificationTask> {
        self.verification_tasks
            .get(id)
            .await?
            .ok_or_else(|| DomainError::VerificationTaskNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAnalysisStateMachineRepository,
        SqliteLearningEngineTaskRepository, SqliteVerificationTaskRepository,
    };
    use crate::domain::models::{
        FeatureFlags, LearningEngineConfig, StateType, VerificationTaskType,
    };
    use crate::domain::ports::{ManualClock, NeverFailFast, NullEventPublisher, NullSliAnalyzer};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        service: AnalysisStateMachineService,
        tasks: Arc<LearningEngineTaskService>,
        clock: Arc<ManualClock>,
    }

    async fn setup(task_type: VerificationTaskType) -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let vt_repo = Arc::new(SqliteVerificationTaskRepository::new(pool.clone()));
        vt_repo
            .save(&VerificationTask::new("vt-1", "acct", task_type, t0()))
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let tasks = Arc::new(LearningEngineTaskService::new(
            Arc::new(SqliteLearningEngineTaskRepository::new(pool.clone())),
            vt_repo.clone(),
            Arc::new(NullEventPublisher),
            clock.clone(),
            LearningEngineConfig::default(),
        ));
        let service = AnalysisStateMachineService::new(
            Arc::new(SqliteAnalysisStateMachineRepository::new(pool)),
            vt_repo,
            tasks.clone(),
            ExecutorRegistry::standard(
                Arc::new(NullSliAnalyzer),
                Arc::new(NeverFailFast),
                FeatureFlags::default(),
            ),
            StateMachineFactory::standard(),
            clock.clone(),
            OrchestrationConfig::default(),
        );
        Fixture { service, tasks, clock }
    }

    fn input(offset_minutes: i64) -> AnalysisInput {
        let start = t0() - Duration::minutes(10) + Duration::minutes(offset_minutes);
        AnalysisInput::new("vt-1", start, start + Duration::minutes(5))
    }

    async fn fail_current_workers(f: &Fixture, machine: &AnalysisStateMachine) {
        while f.tasks.get_next_analysis_task(None).await.unwrap().is_some() {}
        for id in &machine.current_state.worker_task_ids {
            f.tasks.mark_failure(*id, "boom").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_requires_known_entity_and_valid_window() {
        let f = setup(VerificationTaskType::Deployment).await;

        let mut bad = input(0);
        bad.end_time = None;
        assert!(matches!(
            f.service.create_state_machine(&bad).await,
            Err(DomainError::ValidationFailed(_))
        ));

        let unknown = AnalysisInput::new("nope", t0(), t0() + Duration::minutes(1));
        assert!(matches!(
            f.service.create_state_machine(&unknown).await,
            Err(DomainError::VerificationTaskNotFound(_))
        ));

        let machine = f.service.create_state_machine(&input(0)).await.unwrap();
        assert_eq!(machine.status, AnalysisStatus::Created);
    }

    #[tokio::test]
    async fn test_initiate_dispatches_first_stage() {
        let f = setup(VerificationTaskType::Deployment).await;
        let machine = f.service.create_state_machine(&input(0)).await.unwrap();
        let started = f.service.initiate_state_machine("vt-1", machine).await.unwrap();

        assert_eq!(started.status, AnalysisStatus::Running);
        assert_eq!(started.current_state.status, AnalysisStatus::Running);
        assert_eq!(started.current_state.worker_task_ids.len(), 1);

        let other = f.service.create_state_machine(&input(5)).await.unwrap();
        let err = f.service.initiate_state_machine("vt-1", other).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_running_stage_is_left_alone() {
        let f = setup(VerificationTaskType::Deployment).await;
        let machine = f.service.create_state_machine(&input(0)).await.unwrap();
        f.service.initiate_state_machine("vt-1", machine).await.unwrap();

        let stepped = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
        assert_eq!(stepped.status, AnalysisStatus::Running);
        assert_eq!(stepped.current_state.state_type, StateType::DeploymentLogHostSampling);
        assert!(f.service.execute_state_machine("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retries_with_backoff_then_fails_deployment() {
        let f = setup(VerificationTaskType::Deployment).await;
        let machine = f.service.create_state_machine(&input(0)).await.unwrap();
        let mut machine = f.service.initiate_state_machine("vt-1", machine).await.unwrap();

        // First failure: retry in 60s.
        fail_current_workers(&f, &machine).await;
        machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
        assert_eq!(machine.current_state.status, AnalysisStatus::Retry);
        assert_eq!(machine.current_state.retry_count, 1);
        assert_eq!(machine.next_attempt_time, Some(t0() + Duration::seconds(60)));

        // Not due yet.
        f.clock.advance(Duration::seconds(30));
        machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
        assert_eq!(machine.current_state.status, AnalysisStatus::Retry);

        f.clock.advance(Duration::seconds(30));
        machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
        assert_eq!(machine.current_state.status, AnalysisStatus::Running);

        // Second failure: backoff doubles.
        fail_current_workers(&f, &machine).await;
        machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
        assert_eq!(machine.current_state.retry_count, 2);
        assert_eq!(machine.next_attempt_time, Some(f.clock.now() + Duration::seconds(120)));

        f.clock.advance(Duration::seconds(120));
        machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
        fail_current_workers(&f, &machine).await;
        machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();

        assert_eq!(machine.status, AnalysisStatus::Failed);
        assert_eq!(machine.current_state.retry_count, 2);
        assert_eq!(machine.total_retry_count, 2);
        assert!(f.service.find_running("vt-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_live_monitoring_is_ignored() {
        let f = setup(VerificationTaskType::LiveMonitoring).await;
        let machine = f.service.create_state_machine(&input(0)).await.unwrap();
        let mut machine = f.service.initiate_state_machine("vt-1", machine).await.unwrap();
        assert_eq!(machine.current_state.worker_task_ids.len(), 5);

        for _ in 0..3 {
            f.clock.advance(Duration::minutes(15));
            machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
            if machine.current_state.status == AnalysisStatus::Running {
                fail_current_workers(&f, &machine).await;
                machine = f.service.execute_state_machine("vt-1").await.unwrap().unwrap();
            }
        }
        assert_eq!(machine.status, AnalysisStatus::Ignored);
        assert_eq!(machine.current_state.status, AnalysisStatus::Ignored);
    }

    #[tokio::test]
    async fn test_ignore_old_state_machine() {
        let f = setup(VerificationTaskType::LiveMonitoring).await;
        let fresh = f.service.create_state_machine(&input(0)).await.unwrap();
        assert!(!f.service.ignore_old_state_machine(&fresh));

        let old_start = t0() - Duration::minutes(200);
        let old = f
            .service
            .create_state_machine(&AnalysisInput::new("vt-1", old_start, old_start + Duration::minutes(5)))
            .await
            .unwrap();
        assert!(f.service.ignore_old_state_machine(&old));
    }
}
