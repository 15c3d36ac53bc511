//! Verification task registration commands.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};

use super::parse_time;
use crate::cli::open_engine;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{
    AnalysisOrchestrator, Config, DataSourceKind, VerificationJobInstance, VerificationTask,
    VerificationTaskType,
};

#[derive(Args, Debug)]
pub struct EntityArgs {
    #[command(subcommand)]
    pub command: EntityCommands,
}

#[derive(Subcommand, Debug)]
pub enum EntityCommands {
    /// Register or update a verification task
    Register {
        /// Verification task ID
        id: String,
        /// Owning account
        #[arg(short, long)]
        account: String,
        /// Pipeline type (live-monitoring, deployment, sli, composite-slo)
        #[arg(short = 't', long = "type")]
        task_type: String,
        /// Signal analysed (log, metric)
        #[arg(short, long, default_value = "log")]
        data_kind: String,
        /// Deployment job instance; created if missing
        #[arg(long)]
        job_instance: Option<String>,
        /// Deployment start (RFC3339)
        #[arg(long, requires = "deployment_end")]
        deployment_start: Option<String>,
        /// Deployment end (RFC3339)
        #[arg(long, requires = "deployment_start")]
        deployment_end: Option<String>,
    },
    /// List verification tasks
    List,
    /// Stop analysing an entity: drop its backlog and mark it COMPLETED
    Complete {
        /// Verification task ID
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct EntityOutput {
    pub task: VerificationTask,
    pub job_instance_created: bool,
}

impl CommandOutput for EntityOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Registered verification task {}", self.task.id),
            format!("  Type: {}", self.task.task_type),
            format!("  Data: {}", self.task.data_kind.as_str()),
        ];
        if let Some(job) = &self.task.verification_job_instance_id {
            let note = if self.job_instance_created { " (created)" } else { "" };
            lines.push(format!("  Job instance: {job}{note}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EntityListOutput {
    pub tasks: Vec<VerificationTask>,
    pub total: usize,
}

impl CommandOutput for EntityListOutput {
    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No verification tasks registered.".to_string();
        }
        format!(
            "{}\n{} verification task(s)",
            TableFormatter::new().format_verification_tasks(&self.tasks),
            self.total
        )
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CompleteOutput {
    pub orchestrator: AnalysisOrchestrator,
}

impl CommandOutput for CompleteOutput {
    fn to_human(&self) -> String {
        format!(
            "Verification task {} is {}",
            self.orchestrator.verification_task_id, self.orchestrator.status
        )
    }
}

pub async fn execute(args: EntityArgs, config: &Config, json_mode: bool) -> Result<()> {
    let engine = open_engine(config).await?;

    match args.command {
        EntityCommands::Register {
            id,
            account,
            task_type,
            data_kind,
            job_instance,
            deployment_start,
            deployment_end,
        } => {
            let task_type = VerificationTaskType::from_str(&task_type)
                .ok_or_else(|| anyhow!("Invalid verification task type: {task_type}"))?;
            let data_kind = DataSourceKind::from_str(&data_kind)
                .ok_or_else(|| anyhow!("Invalid data kind: {data_kind}"))?;

            let now = Utc::now();
            let mut task = VerificationTask::new(id, account, task_type, now).with_data_kind(data_kind);
            if let (Some(start), Some(end)) = (deployment_start, deployment_end) {
                task = task.with_deployment_window(parse_time(&start)?, parse_time(&end)?);
            }

            let mut job_instance_created = false;
            if let Some(job_id) = job_instance {
                if engine.job_instances.get(&job_id).await?.is_none() {
                    engine
                        .job_instances
                        .save(&VerificationJobInstance::new(job_id.clone(), now))
                        .await
                        .context("Failed to create job instance")?;
                    job_instance_created = true;
                }
                task = task.with_job_instance(job_id);
            }

            engine.verification_tasks.save(&task).await?;
            output(&EntityOutput { task, job_instance_created }, json_mode);
        }

        EntityCommands::List => {
            let tasks = engine.verification_tasks.list().await?;
            output(&EntityListOutput { total: tasks.len(), tasks }, json_mode);
        }

        EntityCommands::Complete { id } => {
            let orchestrator = engine.orchestration.mark_completed(&id).await?;
            output(&CompleteOutput { orchestrator }, json_mode);
        }
    }

    Ok(())
}
