//! Analysis input domain model.
//!
//! An `AnalysisInput` is the immutable description of one analysis window
//! for one verification entity. Upstream schedulers build one per elapsed
//! window and hand it to `queue_analysis`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub verification_task_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub verification_job_instance_id: Option<String>,
    #[serde(default)]
    pub control_hosts: BTreeSet<String>,
    #[serde(default)]
    pub test_hosts: BTreeSet<String>,
    #[serde(default)]
    pub is_slo_restore_task: bool,
}

impl AnalysisInput {
    pub fn new(
        verification_task_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            verification_task_id: verification_task_id.into(),
            start_time: Some(start_time),
            end_time: Some(end_time),
            verification_job_instance_id: None,
            control_hosts: BTreeSet::new(),
            test_hosts: BTreeSet::new(),
            is_slo_restore_task: false,
        }
    }

    pub fn with_job_instance(mut self, job_instance_id: impl Into<String>) -> Self {
        self.verification_job_instance_id = Some(job_instance_id.into());
        self
    }

    pub fn with_control_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.control_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_test_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_slo_restore(mut self) -> Self {
        self.is_slo_restore_task = true;
        self
    }

    /// Reject inputs that cannot describe a window.
    pub fn validate(&self) -> DomainResult<()> {
        if self.verification_task_id.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "verification_task_id cannot be empty".to_string(),
            ));
        }
        let (start, end) = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (start, end),
            (None, _) => {
                return Err(DomainError::ValidationFailed(
                    "start_time is required".to_string(),
                ))
            }
            (_, None) => {
                return Err(DomainError::ValidationFailed(
                    "end_time is required".to_string(),
                ))
            }
        };
        if start >= end {
            return Err(DomainError::ValidationFailed(format!(
                "start_time {start} must be before end_time {end}"
            )));
        }
        Ok(())
    }

    /// The validated `[start, end)` window.
    pub fn window(&self) -> DomainResult<(DateTime<Utc>, DateTime<Utc>)> {
        self.validate()?;
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(DomainError::ValidationFailed(
                "analysis window is incomplete".to_string(),
            )),
        }
    }
}
