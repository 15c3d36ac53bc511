//! Implementation of the `vigil status` command.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use std::collections::HashMap;

use crate::cli::open_engine;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{
    AnalysisOrchestrator, AnalysisStateMachine, Config, LearningEngineTaskStatus,
    OrchestratorStatus,
};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show one verification task in detail
    pub verification_task_id: Option<String>,

    /// Filter the overview by orchestrator status
    #[arg(short, long)]
    pub status: Option<String>,

    /// State machines shown in the detail view
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct OverviewOutput {
    pub orchestrators: Vec<AnalysisOrchestrator>,
    pub tasks: HashMap<LearningEngineTaskStatus, u64>,
    #[serde(skip)]
    pub now: DateTime<Utc>,
}

impl CommandOutput for OverviewOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut lines = vec![];
        if self.orchestrators.is_empty() {
            lines.push("No orchestrators found.".to_string());
        } else {
            lines.push(formatter.format_orchestrators(&self.orchestrators, self.now));
            lines.push(format!("Showing {} orchestrator(s)", self.orchestrators.len()));
        }
        lines.push("\nLearning engine queue:".to_string());
        lines.push(formatter.format_task_counts(&self.tasks));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        let tasks: HashMap<&str, u64> = self.tasks.iter().map(|(s, n)| (s.as_str(), *n)).collect();
        serde_json::json!({
            "orchestrators": self.orchestrators,
            "tasks": tasks,
        })
    }
}

#[derive(Debug, serde::Serialize)]
pub struct DetailOutput {
    pub orchestrator: AnalysisOrchestrator,
    pub state_machines: Vec<AnalysisStateMachine>,
}

impl CommandOutput for DetailOutput {
    fn to_human(&self) -> String {
        let o = &self.orchestrator;
        let mut lines = vec![
            format!("Verification task: {}", o.verification_task_id),
            format!("Account: {}", o.account_id),
            format!("Status: {}", o.status),
            format!("Backlog: {}", o.backlog_len()),
            format!("Version: {}", o.version),
        ];
        if !self.state_machines.is_empty() {
            lines.push("\nState machines (newest first):".to_string());
            lines.push(TableFormatter::new().format_state_machines(&self.state_machines));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: StatusArgs, config: &Config, json_mode: bool) -> Result<()> {
    let engine = open_engine(config).await?;

    if let Some(verification_task_id) = args.verification_task_id {
        let orchestrator = engine
            .orchestration
            .get_analysis_orchestrator(&verification_task_id)
            .await?
            .ok_or_else(|| anyhow!("No orchestrator for verification task {verification_task_id}"))?;
        let mut state_machines = engine
            .state_machines
            .list_state_machines(&verification_task_id)
            .await?;
        state_machines.sort_by(|a, b| b.analysis_start_time.cmp(&a.analysis_start_time));
        state_machines.truncate(args.limit);

        output(&DetailOutput { orchestrator, state_machines }, json_mode);
        return Ok(());
    }

    let status = args
        .status
        .as_deref()
        .map(|s| OrchestratorStatus::from_str(s).ok_or_else(|| anyhow!("Invalid status: {s}")))
        .transpose()?;
    let out = OverviewOutput {
        orchestrators: engine.orchestration.list_orchestrators(status).await?,
        tasks: engine.tasks.count_by_status().await?,
        now: Utc::now(),
    };
    output(&out, json_mode);
    Ok(())
}
