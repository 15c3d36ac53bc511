//! Analysis state machine repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::AnalysisStateMachine;

/// Repository interface for AnalysisStateMachine persistence.
///
/// Implementations must refuse to hold two RUNNING machines for the same
/// verification task and report that as `DomainError::ConcurrencyConflict`.
#[async_trait]
pub trait AnalysisStateMachineRepository: Send + Sync {
    /// Insert a machine that has never been persisted.
    ///
    /// Fails with `ConcurrencyConflict` when the uuid is already stored or
    /// the entity already has a RUNNING machine.
    async fn insert(&self, machine: &AnalysisStateMachine) -> DomainResult<()>;

    /// Insert or update a machine by uuid.
    async fn save(&self, machine: &AnalysisStateMachine) -> DomainResult<()>;

    /// Insert or update a batch of machines in one transaction.
    async fn save_all(&self, machines: &[AnalysisStateMachine]) -> DomainResult<()>;

    async fn get(&self, uuid: Uuid) -> DomainResult<Option<AnalysisStateMachine>>;

    /// The RUNNING machine for a verification task, if any.
    async fn find_running(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisStateMachine>>;

    /// The most recently updated machine that started and reached a final status.
    ///
    /// Windows closed from the backlog without ever running are skipped.
    async fn find_latest_final(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisStateMachine>>;

    /// All persisted machines for a verification task, oldest window first.
    async fn list_by_verification_task(&self, verification_task_id: &str) -> DomainResult<Vec<AnalysisStateMachine>>;
}
