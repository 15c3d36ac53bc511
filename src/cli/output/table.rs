//! Table output formatting for CLI commands
//!
//! Renders orchestrators, state machines and queue counts with comfy-table.

use chrono::{DateTime, Utc};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::collections::HashMap;
use std::env;

use crate::domain::models::{
    AnalysisOrchestrator, AnalysisStateMachine, AnalysisStatus, LearningEngineTaskStatus,
    OrchestratorStatus, VerificationTask,
};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    pub fn format_orchestrators(&self, orchestrators: &[AnalysisOrchestrator], now: DateTime<Utc>) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Verification task", "Status", "Backlog", "Version", "Updated"]));

        for orchestrator in orchestrators {
            let status = self.colored(orchestrator.status.as_str(), orchestrator_color(orchestrator.status));
            table.add_row(vec![
                Cell::new(truncate_text(&orchestrator.verification_task_id, 40)),
                status,
                Cell::new(orchestrator.backlog_len()),
                Cell::new(orchestrator.version),
                Cell::new(format_relative_time(orchestrator.last_updated_at, now)),
            ]);
        }

        table.to_string()
    }

    pub fn format_state_machines(&self, machines: &[AnalysisStateMachine]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Window", "Stage", "Stage status", "Status", "Retries"]));

        for machine in machines {
            let window = format!(
                "{} - {}",
                machine.analysis_start_time.format("%m-%d %H:%M"),
                machine.analysis_end_time.format("%H:%M")
            );
            table.add_row(vec![
                Cell::new(&machine.uuid.to_string()[..8]),
                Cell::new(window),
                Cell::new(machine.current_state.state_type.as_str()),
                self.colored(machine.current_state.status.as_str(), analysis_color(machine.current_state.status)),
                self.colored(machine.status.as_str(), analysis_color(machine.status)),
                Cell::new(machine.total_retry_count),
            ]);
        }

        table.to_string()
    }

    pub fn format_verification_tasks(&self, tasks: &[VerificationTask]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Account", "Type", "Data", "Job instance"]));

        for task in tasks {
            table.add_row(vec![
                Cell::new(truncate_text(&task.id, 40)),
                Cell::new(&task.account_id),
                Cell::new(task.task_type.as_str()),
                Cell::new(task.data_kind.as_str()),
                Cell::new(task.verification_job_instance_id.as_deref().unwrap_or("-")),
            ]);
        }

        table.to_string()
    }

    pub fn format_task_counts(&self, counts: &HashMap<LearningEngineTaskStatus, u64>) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Status", "Tasks"]));

        for status in [
            LearningEngineTaskStatus::Queued,
            LearningEngineTaskStatus::Running,
            LearningEngineTaskStatus::Success,
            LearningEngineTaskStatus::Failed,
            LearningEngineTaskStatus::Timeout,
        ] {
            table.add_row(vec![
                Cell::new(status.as_str()),
                Cell::new(counts.get(&status).copied().unwrap_or(0)),
            ]);
        }

        table.to_string()
    }

    fn colored(&self, text: &str, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).add_attribute(Attribute::Bold))
        .collect()
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn orchestrator_color(status: OrchestratorStatus) -> Color {
    match status {
        OrchestratorStatus::Created => Color::White,
        OrchestratorStatus::Running => Color::Cyan,
        OrchestratorStatus::Waiting => Color::Yellow,
        OrchestratorStatus::Completed => Color::Green,
        OrchestratorStatus::Terminated => Color::Red,
    }
}

fn analysis_color(status: AnalysisStatus) -> Color {
    match status {
        AnalysisStatus::Success => Color::Green,
        AnalysisStatus::Running | AnalysisStatus::Transition => Color::Cyan,
        AnalysisStatus::Retry | AnalysisStatus::Timeout => Color::Yellow,
        AnalysisStatus::Failed | AnalysisStatus::Terminated => Color::Red,
        AnalysisStatus::Ignored => Color::DarkGrey,
        AnalysisStatus::Created => Color::White,
    }
}

fn truncate_text(text: &str, max_len: usize) -> String {
    super::truncate(text, max_len)
}

/// Format relative time (e.g., "2 hours ago")
fn format_relative_time(datetime: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(datetime);

    if duration.num_seconds() < 60 {
        "just now".to_string()
    } else if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        datetime.format("%Y-%m-%d").to_string()
    }
}
