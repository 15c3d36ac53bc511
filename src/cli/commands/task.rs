//! Learning engine queue commands.
//!
//! These mirror what a worker does against the queue, which is handy when
//! driving the engine by hand.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::cli::open_engine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, LearningEngineTask, LearningEngineTaskType};
use crate::services::TaskTimings;

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Claim the next queued task
    Next {
        /// Only claim these analysis types (comma-separated)
        #[arg(short = 't', long = "type", value_delimiter = ',')]
        types: Vec<String>,
    },
    /// Mark a running task as successful
    Complete {
        /// Task ID
        id: Uuid,
    },
    /// Mark a running task as failed
    Fail {
        /// Task ID
        id: Uuid,
        /// Failure detail recorded on the task
        #[arg(short, long, default_value = "failed by operator")]
        exception: String,
    },
    /// Show a task
    Show {
        /// Task ID
        id: Uuid,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct TaskOutput {
    pub task: Option<LearningEngineTask>,
}

impl CommandOutput for TaskOutput {
    fn to_human(&self) -> String {
        let Some(task) = &self.task else {
            return "No task available.".to_string();
        };
        let mut lines = vec![
            format!("Task: {}", task.uuid),
            format!("Verification task: {}", task.verification_task_id),
            format!("Type: {}", task.analysis_type),
            format!("Priority: {:?}", task.task_priority),
            format!("Status: {}", task.task_status),
            format!(
                "Window: {} - {}",
                task.analysis_start_time.to_rfc3339(),
                task.analysis_end_time.to_rfc3339()
            ),
        ];
        let urls = [
            ("Test data", &task.test_data_url),
            ("Control data", &task.control_data_url),
            ("Save", &task.analysis_save_url),
            ("Failure", &task.failure_url),
        ];
        for (label, url) in urls {
            if let Some(url) = url {
                lines.push(format!("{label}: {url}"));
            }
        }
        if let Some(exception) = &task.exception {
            lines.push(format!("Exception: {exception}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct FinishOutput {
    pub task_id: Uuid,
    pub outcome: &'static str,
    pub wait_secs: i64,
    pub run_secs: i64,
}

impl FinishOutput {
    fn new(task_id: Uuid, outcome: &'static str, timings: &TaskTimings) -> Self {
        Self {
            task_id,
            outcome,
            wait_secs: timings.wait.num_seconds(),
            run_secs: timings.run.num_seconds(),
        }
    }
}

impl CommandOutput for FinishOutput {
    fn to_human(&self) -> String {
        format!(
            "Task {} marked {} (waited {}s, ran {}s)",
            self.task_id, self.outcome, self.wait_secs, self.run_secs
        )
    }
}

fn parse_types(types: &[String]) -> Result<Option<Vec<LearningEngineTaskType>>> {
    if types.is_empty() {
        return Ok(None);
    }
    types
        .iter()
        .map(|t| LearningEngineTaskType::from_str(t).ok_or_else(|| anyhow!("Invalid task type: {t}")))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

pub async fn execute(args: TaskArgs, config: &Config, json_mode: bool) -> Result<()> {
    let engine = open_engine(config).await?;

    match args.command {
        TaskCommands::Next { types } => {
            let filter = parse_types(&types)?;
            let task = engine.tasks.get_next_analysis_task(filter.as_deref()).await?;
            output(&TaskOutput { task }, json_mode);
        }
        TaskCommands::Complete { id } => {
            let timings = engine.tasks.mark_completed(id).await?;
            output(&FinishOutput::new(id, "SUCCESS", &timings), json_mode);
        }
        TaskCommands::Fail { id, exception } => {
            let timings = engine.tasks.mark_failure(id, &exception).await?;
            output(&FinishOutput::new(id, "FAILED", &timings), json_mode);
        }
        TaskCommands::Show { id } => {
            let task = engine
                .tasks
                .get_task(id)
                .await?
                .ok_or_else(|| anyhow!("Task not found: {id}"))?;
            output(&TaskOutput { task: Some(task) }, json_mode);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types() {
        assert!(parse_types(&[]).unwrap().is_none());
        let types = parse_types(&["log-cluster".to_string(), "DEPLOYMENT_TIME_SERIES".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(
            types,
            vec![LearningEngineTaskType::LogCluster, LearningEngineTaskType::DeploymentTimeSeries]
        );
        assert!(parse_types(&["bogus".to_string()]).is_err());
    }
}
