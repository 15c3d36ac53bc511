//! Learning engine task domain model.
//!
//! A learning engine task is one unit of ML computation handed to the
//! external worker pool. Workers claim tasks from the queue, fetch their
//! inputs from the task URLs and report back through the save or failure
//! callbacks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningEngineTaskType {
    LogCluster,
    ServiceGuardLogAnalysis,
    ServiceGuardTrendAnalysis,
    ServiceGuardTimeSeries,
    LogHostSampling,
    MetricHostSampling,
    DeploymentLogAnalysis,
    DeploymentLogFeedback,
    DeploymentTimeSeries,
}

impl LearningEngineTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogCluster => "LOG_CLUSTER",
            Self::ServiceGuardLogAnalysis => "SERVICE_GUARD_LOG_ANALYSIS",
            Self::ServiceGuardTrendAnalysis => "SERVICE_GUARD_TREND_ANALYSIS",
            Self::ServiceGuardTimeSeries => "SERVICE_GUARD_TIME_SERIES",
            Self::LogHostSampling => "LOG_HOST_SAMPLING",
            Self::MetricHostSampling => "METRIC_HOST_SAMPLING",
            Self::DeploymentLogAnalysis => "DEPLOYMENT_LOG_ANALYSIS",
            Self::DeploymentLogFeedback => "DEPLOYMENT_LOG_FEEDBACK",
            Self::DeploymentTimeSeries => "DEPLOYMENT_TIME_SERIES",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "LOG_CLUSTER" => Some(Self::LogCluster),
            "SERVICE_GUARD_LOG_ANALYSIS" => Some(Self::ServiceGuardLogAnalysis),
            "SERVICE_GUARD_TREND_ANALYSIS" => Some(Self::ServiceGuardTrendAnalysis),
            "SERVICE_GUARD_TIME_SERIES" => Some(Self::ServiceGuardTimeSeries),
            "LOG_HOST_SAMPLING" => Some(Self::LogHostSampling),
            "METRIC_HOST_SAMPLING" => Some(Self::MetricHostSampling),
            "DEPLOYMENT_LOG_ANALYSIS" => Some(Self::DeploymentLogAnalysis),
            "DEPLOYMENT_LOG_FEEDBACK" => Some(Self::DeploymentLogFeedback),
            "DEPLOYMENT_TIME_SERIES" => Some(Self::DeploymentTimeSeries),
            _ => None,
        }
    }

    /// URL path segment used for worker callbacks.
    pub fn url_segment(&self) -> String {
        self.as_str().to_lowercase().replace('_', "-")
    }

    /// Whether the worker needs a control (baseline) data set.
    pub fn needs_control_data(&self) -> bool {
        matches!(
            self,
            Self::DeploymentLogAnalysis | Self::DeploymentLogFeedback | Self::DeploymentTimeSeries
        )
    }
}

impl std::fmt::Display for LearningEngineTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim priority. Lower sorts first, so `P0` preempts `P1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum TaskPriority {
    P0 = 0,
    #[default]
    P1 = 1,
}

impl TaskPriority {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::P0),
            1 => Some(Self::P1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningEngineTaskStatus {
    #[default]
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
}

impl LearningEngineTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }

    /// Valid transitions from this status. Status only moves forward.
    pub fn valid_transitions(&self) -> Vec<LearningEngineTaskStatus> {
        match self {
            Self::Queued => vec![Self::Running],
            Self::Running => vec![Self::Success, Self::Failed, Self::Timeout],
            Self::Success | Self::Failed | Self::Timeout => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for LearningEngineTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEngineTask {
    pub uuid: Uuid,
    pub verification_task_id: String,
    pub account_id: String,
    pub analysis_type: LearningEngineTaskType,
    pub task_priority: TaskPriority,
    pub task_status: LearningEngineTaskStatus,
    pub analysis_start_time: DateTime<Utc>,
    pub analysis_end_time: DateTime<Utc>,
    pub test_data_url: Option<String>,
    pub control_data_url: Option<String>,
    pub analysis_save_url: Option<String>,
    pub failure_url: Option<String>,
    /// Worker-supplied failure detail. Never set for timeouts.
    pub exception: Option<String>,
    pub picked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl LearningEngineTask {
    pub fn new(
        verification_task_id: impl Into<String>,
        account_id: impl Into<String>,
        analysis_type: LearningEngineTaskType,
        analysis_start_time: DateTime<Utc>,
        analysis_end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            verification_task_id: verification_task_id.into(),
            account_id: account_id.into(),
            analysis_type,
            task_priority: TaskPriority::default(),
            task_status: LearningEngineTaskStatus::Queued,
            analysis_start_time,
            analysis_end_time,
            test_data_url: None,
            control_data_url: None,
            analysis_save_url: None,
            failure_url: None,
            exception: None,
            picked_at: None,
            created_at: now,
            last_updated_at: now,
        }
    }
}
