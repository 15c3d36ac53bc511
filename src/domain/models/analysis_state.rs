//! Analysis state domain model.
//!
//! An analysis state is one stage of a pipeline. The stage kind is a tag
//! (`StateType`); the behaviour of each kind lives in a state executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analysis_input::AnalysisInput;

/// Pipeline stage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    ServiceGuardLogCluster,
    ServiceGuardLogAnalysis,
    ServiceGuardTrendAnalysis,
    ServiceGuardTimeSeries,
    DeploymentLogHostSampling,
    DeploymentMetricHostSampling,
    PreDeploymentLogCluster,
    DeploymentLogCluster,
    DeploymentLogAnalysis,
    DeploymentLogFeedback,
    DeploymentTimeSeriesAnalysis,
    SliMetricAnalysis,
    CompositeSloMetricAnalysis,
}

impl StateType {
    pub const ALL: [StateType; 13] = [
        Self::ServiceGuardLogCluster,
        Self::ServiceGuardLogAnalysis,
        Self::ServiceGuardTrendAnalysis,
        Self::ServiceGuardTimeSeries,
        Self::DeploymentLogHostSampling,
        Self::DeploymentMetricHostSampling,
        Self::PreDeploymentLogCluster,
        Self::DeploymentLogCluster,
        Self::DeploymentLogAnalysis,
        Self::DeploymentLogFeedback,
        Self::DeploymentTimeSeriesAnalysis,
        Self::SliMetricAnalysis,
        Self::CompositeSloMetricAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceGuardLogCluster => "SERVICE_GUARD_LOG_CLUSTER",
            Self::ServiceGuardLogAnalysis => "SERVICE_GUARD_LOG_ANALYSIS",
            Self::ServiceGuardTrendAnalysis => "SERVICE_GUARD_TREND_ANALYSIS",
            Self::ServiceGuardTimeSeries => "SERVICE_GUARD_TIME_SERIES",
            Self::DeploymentLogHostSampling => "DEPLOYMENT_LOG_HOST_SAMPLING",
            Self::DeploymentMetricHostSampling => "DEPLOYMENT_METRIC_HOST_SAMPLING",
            Self::PreDeploymentLogCluster => "PRE_DEPLOYMENT_LOG_CLUSTER",
            Self::DeploymentLogCluster => "DEPLOYMENT_LOG_CLUSTER",
            Self::DeploymentLogAnalysis => "DEPLOYMENT_LOG_ANALYSIS",
            Self::DeploymentLogFeedback => "DEPLOYMENT_LOG_FEEDBACK",
            Self::DeploymentTimeSeriesAnalysis => "DEPLOYMENT_TIME_SERIES_ANALYSIS",
            Self::SliMetricAnalysis => "SLI_METRIC_ANALYSIS",
            Self::CompositeSloMetricAnalysis => "COMPOSITE_SLO_METRIC_ANALYSIS",
        }
    }
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single state, and of a whole state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    #[default]
    Created,
    Running,
    Transition,
    Retry,
    Success,
    Failed,
    Ignored,
    Timeout,
    Terminated,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Transition => "TRANSITION",
            Self::Retry => "RETRY",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Ignored => "IGNORED",
            Self::Timeout => "TIMEOUT",
            Self::Terminated => "TERMINATED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CREATED" => Some(Self::Created),
            "RUNNING" => Some(Self::Running),
            "TRANSITION" => Some(Self::Transition),
            "RETRY" => Some(Self::Retry),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "IGNORED" => Some(Self::Ignored),
            "TIMEOUT" => Some(Self::Timeout),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Statuses a machine never leaves. TIMEOUT is retried, so it is not final.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Ignored | Self::Terminated
        )
    }

    /// Final statuses that stop the owning orchestrator.
    pub fn is_failing(&self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log clustering level for live-monitoring clustering stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterLevel {
    /// Per-minute clustering of raw log records.
    L1,
    /// Clustering of L1 clusters across the whole window.
    L2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub state_type: StateType,
    pub status: AnalysisStatus,
    pub retry_count: u32,
    /// Learning engine tasks this state is waiting on.
    #[serde(default)]
    pub worker_task_ids: Vec<Uuid>,
    pub inputs: AnalysisInput,
    #[serde(default)]
    pub cluster_level: Option<ClusterLevel>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl AnalysisState {
    pub fn new(state_type: StateType, inputs: AnalysisInput) -> Self {
        Self {
            state_type,
            status: AnalysisStatus::Created,
            retry_count: 0,
            worker_task_ids: Vec::new(),
            inputs,
            cluster_level: None,
            started_at: None,
        }
    }

    pub fn with_cluster_level(mut self, level: ClusterLevel) -> Self {
        self.cluster_level = Some(level);
        self
    }

    /// The primary worker task, if the stage dispatched any.
    pub fn worker_task_id(&self) -> Option<Uuid> {
        self.worker_task_ids.first().copied()
    }
}
