//! Ports to the business logic that runs inside pipeline stages.
//!
//! The orchestration engine never computes scores itself. Synchronous SLO
//! stages call an `SliAnalyzer`, and deployment analysis stages ask an
//! `AnalysisOutcomeInspector` whether the verification should stop early.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisInput, StateType};

/// Computes SLI and composite SLO results for one window in-process.
#[async_trait]
pub trait SliAnalyzer: Send + Sync {
    async fn analyze(&self, state_type: StateType, input: &AnalysisInput) -> DomainResult<()>;
}

/// Decides whether a finished deployment window is conclusively bad.
#[async_trait]
pub trait AnalysisOutcomeInspector: Send + Sync {
    async fn should_fail_fast(&self, input: &AnalysisInput) -> DomainResult<bool>;
}

/// An SLI analyzer that records nothing.
///
/// Use this when SLO scoring happens outside the process.
#[derive(Debug, Clone, Default)]
pub struct NullSliAnalyzer;

#[async_trait]
impl SliAnalyzer for NullSliAnalyzer {
    async fn analyze(&self, state_type: StateType, input: &AnalysisInput) -> DomainResult<()> {
        tracing::debug!(
            state_type = %state_type,
            verification_task_id = %input.verification_task_id,
            slo_restore = input.is_slo_restore_task,
            "sli analysis skipped"
        );
        Ok(())
    }
}

/// An inspector that never fails a verification early.
#[derive(Debug, Clone, Default)]
pub struct NeverFailFast;

#[async_trait]
impl AnalysisOutcomeInspector for NeverFailFast {
    async fn should_fail_fast(&self, _input: &AnalysisInput) -> DomainResult<bool> {
        Ok(false)
    }
}
