//! CLI command implementations.

pub mod config;
pub mod entity;
pub mod init;
pub mod queue;
pub mod run;
pub mod status;
pub mod task;
pub mod tick;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Parse an RFC3339 timestamp argument.
pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{value}', expected RFC3339"))
}
