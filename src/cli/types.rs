//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::{
    config::ConfigArgs, entity::EntityArgs, init::InitArgs, queue::QueueArgs, run::RunArgs,
    status::StatusArgs, task::TaskArgs, tick::TickArgs,
};

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Vigil - continuous verification analysis orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .vigil/config.yaml)
    #[arg(short, long, global = true, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the .vigil directory, default config and database
    Init(InitArgs),

    /// Run the orchestration poller until interrupted
    Run(RunArgs),

    /// Queue one analysis window for a verification task
    Queue(QueueArgs),

    /// Run a single poller pass
    Tick(TickArgs),

    /// Show orchestrator and state machine status
    Status(StatusArgs),

    /// Verification task registration
    Entity(EntityArgs),

    /// Learning engine queue operations
    Task(TaskArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}
