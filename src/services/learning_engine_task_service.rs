//! Learning engine task queue.
//!
//! Producers are pipeline stages that dispatch worker tasks; consumers are
//! external learning engine workers that claim tasks, run them and report
//! back. Claiming is atomic in the repository, so many workers can poll the
//! same queue.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    LearningEngineConfig, LearningEngineTask, LearningEngineTaskStatus, LearningEngineTaskType,
    TaskPriority, VerificationTaskType,
};
use crate::domain::ports::{
    Clock, LearningEngineTaskRepository, StateMachineEventPublisher, TaskCompleteEvent,
    VerificationTaskRepository,
};

/// How long a finished task waited in the queue and how long it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTimings {
    /// From creation until a worker claimed it.
    pub wait: Duration,
    /// From the claim until the report.
    pub run: Duration,
}

/// Work queue shared by pipeline stages and learning engine workers.
///
/// Owns task creation, claiming, completion and timeouts. Completion events
/// go out through the configured publisher.
pub struct LearningEngineTaskService {
    repo: Arc<dyn LearningEngineTaskRepository>,
    verification_tasks: Arc<dyn VerificationTaskRepository>,
    publisher: Arc<dyn StateMachineEventPublisher>,
    clock: Arc<dyn Clock>,
    config: LearningEngineConfig,
}

impl LearningEngineTaskService {
    /// Build the service over its repositories. `config` supplies the batch
    /// size, task timeout and the base URL for worker data endpoints.
    pub fn new(
        repo: Arc<dyn LearningEngineTaskRepository>,
        verification_tasks: Arc<dyn VerificationTaskRepository>,
        publisher: Arc<dyn StateMachineEventPublisher>,
        clock: Arc<dyn Clock>,
        config: LearningEngineConfig,
    ) -> Self {
        Self {
            repo,
            verification_tasks,
            publisher,
            clock,
            config,
        }
    }

    /// Enqueue one worker task and return its id.
    pub async fn create_learning_engine_task(&self, task: LearningEngineTask) -> DomainResult<Uuid> {
        let ids = self.create_learning_engine_tasks(vec![task]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| DomainError::ExecutionFailed("no task was enqueued".to_string()))
    }

    /// Enqueue worker tasks in batches.
    ///
    /// Every task is stored QUEUED with fresh timestamps and its data URLs
    /// filled in. Tasks owned by deployment verifications jump the queue.
    #[instrument(skip(self, tasks), fields(count = tasks.len()), err)]
    pub async fn create_learning_engine_tasks(
        &self,
        mut tasks: Vec<LearningEngineTask>,
    ) -> DomainResult<Vec<Uuid>> {
        let now = self.clock.now();
        let mut owner_types: HashMap<String, Option<VerificationTaskType>> = HashMap::new();

        for task in &mut tasks {
            if !owner_types.contains_key(&task.verification_task_id) {
                let owner = self
                    .verification_tasks
                    .get(&task.verification_task_id)
                    .await?
                    .map(|vt| vt.task_type);
                owner_types.insert(task.verification_task_id.clone(), owner);
            }
            let owner = owner_types.get(&task.verification_task_id).copied().flatten();

            task.task_status = LearningEngineTaskStatus::Queued;
            task.task_priority = match owner {
                Some(VerificationTaskType::Deployment) => TaskPriority::P0,
                _ => TaskPriority::P1,
            };
            task.picked_at = None;
            task.exception = None;
            task.created_at = now;
            task.last_updated_at = now;
            self.attach_urls(task);
        }

        for chunk in tasks.chunks(self.config.batch_size.max(1)) {
            self.repo.insert_batch(chunk).await?;
        }

        debug!(count = tasks.len(), "learning engine tasks queued");
        Ok(tasks.iter().map(|t| t.uuid).collect())
    }

    /// Claim the next task for a worker, optionally limited to some analysis types.
    #[instrument(skip(self), err)]
    pub async fn get_next_analysis_task(
        &self,
        type_filter: Option<&[LearningEngineTaskType]>,
    ) -> DomainResult<Option<LearningEngineTask>> {
        let now = self.clock.now();
        let claimed = self.repo.claim_next(type_filter, now).await?;
        if let Some(task) = &claimed {
            info!(
                task_id = %task.uuid,
                verification_task_id = %task.verification_task_id,
                analysis_type = %task.analysis_type,
                waited_secs = (now - task.created_at).num_seconds(),
                "learning engine task picked"
            );
        }
        Ok(claimed)
    }

    /// Current status of each task, reaping listed tasks that ran too long first.
    ///
    /// Unknown ids are absent from the map.
    pub async fn get_task_status(
        &self,
        task_ids: &[Uuid],
    ) -> DomainResult<HashMap<Uuid, LearningEngineTaskStatus>> {
        if task_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let now = self.clock.now();
        let reaped = self
            .repo
            .reap_stale_running(Some(task_ids), now - self.timeout(), now)
            .await?;
        if reaped > 0 {
            warn!(reaped, "learning engine tasks timed out");
        }

        let tasks = self.repo.get_many(task_ids).await?;
        Ok(tasks.into_iter().map(|t| (t.uuid, t.task_status)).collect())
    }

    /// Record a successful run.
    #[instrument(skip(self), err)]
    pub async fn mark_completed(&self, task_id: Uuid) -> DomainResult<TaskTimings> {
        self.finish(task_id, LearningEngineTaskStatus::Success, None).await
    }

    /// Record a failed run along with the worker's exception text.
    #[instrument(skip(self, exception), err)]
    pub async fn mark_failure(&self, task_id: Uuid, exception: &str) -> DomainResult<TaskTimings> {
        self.finish(task_id, LearningEngineTaskStatus::Failed, Some(exception)).await
    }

    /// Time out every RUNNING task that has gone quiet.
    pub async fn reap_timed_out_tasks(&self) -> DomainResult<u64> {
        let now = self.clock.now();
        let reaped = self
            .repo
            .reap_stale_running(None, now - self.timeout(), now)
            .await?;
        if reaped > 0 {
            warn!(reaped, "learning engine tasks timed out");
        }
        Ok(reaped)
    }

    /// Fail queued or running tasks that no pipeline stage will read anymore.
    ///
    /// Workers can no longer claim them, and a late report for a task that was
    /// already running is rejected.
    #[instrument(skip(self, task_ids), fields(count = task_ids.len()), err)]
    pub async fn abandon_tasks(&self, task_ids: &[Uuid], reason: &str) -> DomainResult<u64> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let abandoned = self
            .repo
            .fail_unfinished(task_ids, reason, self.clock.now())
            .await?;
        if abandoned > 0 {
            debug!(abandoned, reason, "learning engine tasks abandoned");
        }
        Ok(abandoned)
    }

    /// Look up one task without touching it.
    pub async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<LearningEngineTask>> {
        self.repo.get(task_id).await
    }

    /// Queue depth per task status.
    pub async fn count_by_status(&self) -> DomainResult<HashMap<LearningEngineTaskStatus, u64>> {
        self.repo.count_by_status().await
    }

    async fn finish(
        &self,
        task_id: Uuid,
        status: LearningEngineTaskStatus,
        exception: Option<&str>,
    ) -> DomainResult<TaskTimings> {
        let now = self.clock.now();
        let Some(task) = self.repo.finish_running(task_id, status, exception, now).await? else {
            return Err(match self.repo.get(task_id).await? {
                None => DomainError::LearningEngineTaskNotFound(task_id),
                Some(existing) => DomainError::InvalidStateTransition {
                    from: existing.task_status.to_string(),
                    to: status.to_string(),
                    reason: "only RUNNING tasks can be finished".to_string(),
                },
            });
        };

        let picked_at = task.picked_at.unwrap_or(task.created_at);
        let timings = TaskTimings {
            wait: picked_at - task.created_at,
            run: now - picked_at,
        };
        info!(
            task_id = %task.uuid,
            verification_task_id = %task.verification_task_id,
            status = %status,
            wait_secs = timings.wait.num_seconds(),
            run_secs = timings.run.num_seconds(),
            "learning engine task finished"
        );

        let event = TaskCompleteEvent {
            account_id: task.account_id.clone(),
            verification_task_id: task.verification_task_id.clone(),
            learning_engine_task_id: task.uuid,
            status,
            occurred_at: now,
        };
        if let Err(e) = self.publisher.register_task_complete(event).await {
            warn!(task_id = %task.uuid, error = %e, "failed to publish task-complete event");
        }

        Ok(timings)
    }

    fn timeout(&self) -> Duration {
        Duration::minutes(self.config.task_timeout_minutes)
    }

    fn attach_urls(&self, task: &mut LearningEngineTask) {
        let base = self.config.base_url.trim_end_matches('/');
        let segment = task.analysis_type.url_segment();
        let window = format!(
            "verificationTaskId={}&startTime={}&endTime={}",
            task.verification_task_id,
            task.analysis_start_time.timestamp_millis(),
            task.analysis_end_time.timestamp_millis()
        );

        task.test_data_url = Some(format!("{base}/{segment}/test-data?{window}"));
        task.control_data_url = task
            .analysis_type
            .needs_control_data()
            .then(|| format!("{base}/{segment}/control-data?{window}"));
        task.analysis_save_url = Some(format!("{base}/{segment}/save-analysis?taskId={}", task.uuid));
        task.failure_url = Some(format!("{base}/learning-engine/mark-failure?taskId={}", task.uuid));
    }
}
