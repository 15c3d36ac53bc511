//! Learning engine task repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{LearningEngineTask, LearningEngineTaskStatus, LearningEngineTaskType};

/// Repository interface for the learning engine work queue.
#[async_trait]
pub trait LearningEngineTaskRepository: Send + Sync {
    async fn insert(&self, task: &LearningEngineTask) -> DomainResult<()>;

    /// Insert tasks in one transaction.
    async fn insert_batch(&self, tasks: &[LearningEngineTask]) -> DomainResult<()>;

    async fn get(&self, uuid: Uuid) -> DomainResult<Option<LearningEngineTask>>;

    async fn get_many(&self, uuids: &[Uuid]) -> DomainResult<Vec<LearningEngineTask>>;

    /// Atomically move the best QUEUED task to RUNNING and return it.
    ///
    /// Best means lowest priority value, then oldest `created_at`. Concurrent
    /// callers never receive the same task.
    async fn claim_next(
        &self,
        type_filter: Option<&[LearningEngineTaskType]>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<LearningEngineTask>>;

    /// Move a RUNNING task to a terminal status.
    ///
    /// Returns the updated task, or `None` when the task was not RUNNING.
    async fn finish_running(
        &self,
        uuid: Uuid,
        status: LearningEngineTaskStatus,
        exception: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<LearningEngineTask>>;

    /// Mark RUNNING tasks last updated before `cutoff` as TIMEOUT.
    ///
    /// Limited to `uuids` when given. Returns the number of reaped tasks.
    async fn reap_stale_running(
        &self,
        uuids: Option<&[Uuid]>,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<u64>;

    /// Mark the given QUEUED or RUNNING tasks as FAILED with `exception`.
    ///
    /// Finished tasks are left untouched. Returns the number of updated tasks.
    async fn fail_unfinished(
        &self,
        uuids: &[Uuid],
        exception: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64>;

    async fn count_by_status(&self) -> DomainResult<HashMap<LearningEngineTaskStatus, u64>>;
}
