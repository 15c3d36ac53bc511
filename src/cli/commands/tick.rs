//! Implementation of the `vigil tick` command.

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::open_engine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::TickSummary;

#[derive(Args, Debug)]
pub struct TickArgs {
    /// Tick only this verification task instead of every running one
    #[arg(long)]
    pub verification_task_id: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum TickOutput {
    Pass(TickSummary),
    Single {
        verification_task_id: String,
        status: Option<String>,
        backlog: usize,
    },
}

impl CommandOutput for TickOutput {
    fn to_human(&self) -> String {
        match self {
            Self::Pass(summary) => [
                "Poller pass finished".to_string(),
                format!("  Reaped tasks: {}", summary.reaped_tasks),
                format!("  Ticked: {}", summary.ticked),
                format!("  Failed: {}", summary.failed),
                format!("  Waiting: {}", summary.waiting),
                format!("  Completed: {}", summary.completed),
                format!("  Terminated: {}", summary.terminated),
            ]
            .join("\n"),
            Self::Single {
                verification_task_id,
                status: Some(status),
                backlog,
            } => format!("{verification_task_id}: {status} (backlog {backlog})"),
            Self::Single {
                verification_task_id,
                status: None,
                ..
            } => format!("No orchestrator for {verification_task_id}"),
        }
    }
}

pub async fn execute(args: TickArgs, config: &Config, json_mode: bool) -> Result<()> {
    let engine = open_engine(config).await?;

    let out = match args.verification_task_id {
        Some(verification_task_id) => {
            let orchestrator = engine
                .orchestration
                .orchestrate_by_id(&verification_task_id)
                .await
                .with_context(|| format!("Failed to tick {verification_task_id}"))?;
            TickOutput::Single {
                status: orchestrator.as_ref().map(|o| o.status.to_string()),
                backlog: orchestrator.as_ref().map_or(0, |o| o.backlog_len()),
                verification_task_id,
            }
        }
        None => TickOutput::Pass(engine.poller().tick().await.context("Poller pass failed")?),
    };

    output(&out, json_mode);
    Ok(())
}
