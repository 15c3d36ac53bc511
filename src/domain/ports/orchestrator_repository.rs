//! Analysis orchestrator repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisOrchestrator, OrchestratorStatus};

/// Repository interface for AnalysisOrchestrator persistence.
#[async_trait]
pub trait AnalysisOrchestratorRepository: Send + Sync {
    /// Insert a new orchestrator. A second orchestrator for the same
    /// verification task is a `ConcurrencyConflict`.
    async fn insert(&self, orchestrator: &AnalysisOrchestrator) -> DomainResult<()>;

    async fn get(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisOrchestrator>>;

    /// Update guarded by `orchestrator.version`.
    ///
    /// On success the stored version and `orchestrator.version` are both
    /// incremented. A stale version yields `ConcurrencyConflict`.
    async fn update(&self, orchestrator: &mut AnalysisOrchestrator) -> DomainResult<()>;

    async fn list(&self, status: Option<OrchestratorStatus>) -> DomainResult<Vec<AnalysisOrchestrator>>;
}
