//! Implementation of the `vigil queue` command.

use anyhow::Result;
use clap::Args;

use super::parse_time;
use crate::cli::open_engine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{AnalysisInput, Config, OrchestratorStatus};

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Verification task the window belongs to
    pub verification_task_id: String,

    /// Window start (RFC3339)
    #[arg(long)]
    pub start: String,

    /// Window end (RFC3339)
    #[arg(long)]
    pub end: String,

    /// Deployment job instance, when the entity has one
    #[arg(long)]
    pub job_instance: Option<String>,

    /// Baseline hosts (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub control_hosts: Vec<String>,

    /// Hosts under test (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub test_hosts: Vec<String>,

    /// Mark the window as an SLO restore run
    #[arg(long)]
    pub slo_restore: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct QueueOutput {
    pub verification_task_id: String,
    pub orchestrator_status: Option<OrchestratorStatus>,
    pub backlog: usize,
}

impl CommandOutput for QueueOutput {
    fn to_human(&self) -> String {
        match self.orchestrator_status {
            Some(status) => format!(
                "Queued window for {}\n  Orchestrator: {}\n  Backlog: {}",
                self.verification_task_id, status, self.backlog
            ),
            None => format!("Queued window for {}", self.verification_task_id),
        }
    }
}

impl QueueArgs {
    fn to_input(&self) -> Result<AnalysisInput> {
        let mut input = AnalysisInput::new(
            self.verification_task_id.clone(),
            parse_time(&self.start)?,
            parse_time(&self.end)?,
        )
        .with_control_hosts(self.control_hosts.iter().cloned())
        .with_test_hosts(self.test_hosts.iter().cloned());
        if let Some(job_instance) = &self.job_instance {
            input = input.with_job_instance(job_instance.clone());
        }
        if self.slo_restore {
            input = input.as_slo_restore();
        }
        Ok(input)
    }
}

pub async fn execute(args: QueueArgs, config: &Config, json_mode: bool) -> Result<()> {
    let input = args.to_input()?;
    let engine = open_engine(config).await?;
    engine.orchestration.queue_analysis(input).await?;

    let orchestrator = engine
        .orchestration
        .get_analysis_orchestrator(&args.verification_task_id)
        .await?;
    let out = QueueOutput {
        verification_task_id: args.verification_task_id,
        orchestrator_status: orchestrator.as_ref().map(|o| o.status),
        backlog: orchestrator.as_ref().map_or(0, |o| o.backlog_len()),
    };
    output(&out, json_mode);
    Ok(())
}
