//! Domain errors for the Vigil orchestration engine.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the orchestration engine.
///
/// Only `ValidationFailed` and `ConcurrencyConflict` are expected to reach
/// callers of the public entry points; worker failures and timeouts are
/// absorbed by the scheduling loop as state transitions.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Verification task not found: {0}")]
    VerificationTaskNotFound(String),

    #[error("Verification job instance not found: {0}")]
    JobInstanceNotFound(String),

    #[error("Analysis state machine not found: {0}")]
    StateMachineNotFound(Uuid),

    #[error("Analysis orchestrator not found: {0}")]
    OrchestratorNotFound(String),

    #[error("Learning engine task not found: {0}")]
    LearningEngineTaskNotFound(Uuid),

    #[error("No executor registered for state type {0}")]
    ExecutorNotRegistered(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl DomainError {
    /// Whether the error is an optimistic-concurrency or uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
