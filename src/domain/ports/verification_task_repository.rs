//! Verification task and job instance repository ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ExecutionStatus, VerificationJobInstance, VerificationStatus, VerificationTask,
};

/// Repository interface for verification entities.
#[async_trait]
pub trait VerificationTaskRepository: Send + Sync {
    /// Insert or replace a verification task.
    async fn save(&self, task: &VerificationTask) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<VerificationTask>>;

    async fn list(&self) -> DomainResult<Vec<VerificationTask>>;
}

/// Repository interface for deployment job instances.
#[async_trait]
pub trait VerificationJobInstanceRepository: Send + Sync {
    async fn save(&self, instance: &VerificationJobInstance) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<VerificationJobInstance>>;

    /// Record the outcome of a job instance.
    async fn update_status(
        &self,
        id: &str,
        execution_status: ExecutionStatus,
        verification_status: Option<VerificationStatus>,
        now: DateTime<Utc>,
    ) -> DomainResult<()>;
}
