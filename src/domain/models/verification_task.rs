//! Verification entities.
//!
//! A verification task is the monitored unit (a live service config, an SLI,
//! a composite SLO or one deployment verification run). Its type decides
//! which analysis pipeline runs for each window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationTaskType {
    LiveMonitoring,
    Deployment,
    Sli,
    CompositeSlo,
}

impl VerificationTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveMonitoring => "LIVE_MONITORING",
            Self::Deployment => "DEPLOYMENT",
            Self::Sli => "SLI",
            Self::CompositeSlo => "COMPOSITE_SLO",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "LIVE_MONITORING" => Some(Self::LiveMonitoring),
            "DEPLOYMENT" => Some(Self::Deployment),
            "SLI" => Some(Self::Sli),
            "COMPOSITE_SLO" => Some(Self::CompositeSlo),
            _ => None,
        }
    }

    /// Pipelines whose exhausted retries fail the verification outright.
    /// Always-on pipelines drop the window instead.
    pub fn fails_on_exhausted_retries(&self) -> bool {
        matches!(self, Self::Deployment)
    }
}

impl std::fmt::Display for VerificationTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which signal a verification analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceKind {
    #[default]
    Log,
    Metric,
}

impl DataSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Metric => "METRIC",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOG" => Some(Self::Log),
            "METRIC" => Some(Self::Metric),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationTask {
    pub id: String,
    pub account_id: String,
    pub task_type: VerificationTaskType,
    pub data_kind: DataSourceKind,
    pub verification_job_instance_id: Option<String>,
    pub deployment_start_time: Option<DateTime<Utc>>,
    pub deployment_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VerificationTask {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        task_type: VerificationTaskType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            task_type,
            data_kind: DataSourceKind::default(),
            verification_job_instance_id: None,
            deployment_start_time: None,
            deployment_end_time: None,
            created_at: now,
        }
    }

    pub fn with_data_kind(mut self, data_kind: DataSourceKind) -> Self {
        self.data_kind = data_kind;
        self
    }

    pub fn with_job_instance(mut self, job_instance_id: impl Into<String>) -> Self {
        self.verification_job_instance_id = Some(job_instance_id.into());
        self
    }

    pub fn with_deployment_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.deployment_start_time = Some(start);
        self.deployment_end_time = Some(end);
        self
    }

    /// A window ending at or before the deployment start only feeds the baseline.
    pub fn is_pre_deployment_window(&self, window_end: DateTime<Utc>) -> bool {
        self.deployment_start_time
            .is_some_and(|start| window_end <= start)
    }

    /// Whether a window ending at `window_end` covers the end of the deployment.
    pub fn deployment_covered_by(&self, window_end: DateTime<Utc>) -> bool {
        self.task_type == VerificationTaskType::Deployment
            && self.deployment_end_time.is_some_and(|end| window_end >= end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Queued,
    Running,
    Success,
    Failed,
    Aborted,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "ABORTED" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    VerificationPassed,
    VerificationFailed,
    Error,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerificationPassed => "VERIFICATION_PASSED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::Error => "ERROR",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "VERIFICATION_PASSED" => Some(Self::VerificationPassed),
            "VERIFICATION_FAILED" => Some(Self::VerificationFailed),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// The deployment job run that owns one or more verification tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationJobInstance {
    pub id: String,
    pub execution_status: ExecutionStatus,
    pub verification_status: Option<VerificationStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationJobInstance {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            execution_status: ExecutionStatus::Running,
            verification_status: None,
            created_at: now,
            updated_at: now,
        }
    }
}
