//! Implementation of the `vigil init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, LoggingConfig};
use crate::infrastructure::config::CONFIG_DIR;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!("\nWrote {CONFIG_DIR}/config.yaml"));
        }
        if self.database_initialized {
            lines.push(format!("Database initialized at {CONFIG_DIR}/vigil.db"));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };
    let vigil_dir = target_path.join(CONFIG_DIR);

    if vigil_dir.exists() && !args.force {
        let out = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_initialized: false,
        };
        output(&out, json_mode);
        return Ok(());
    }

    if args.force && vigil_dir.exists() {
        fs::remove_dir_all(&vigil_dir)
            .await
            .with_context(|| format!("Failed to remove existing {CONFIG_DIR} directory"))?;
    }

    let mut directories_created = vec![];
    for dir in [vigil_dir.clone(), vigil_dir.join("logs")] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir
                .strip_prefix(&target_path)
                .unwrap_or(dir.as_path())
                .to_string_lossy()
                .to_string();
            directories_created.push(relative);
        }
    }

    write_default_config(&vigil_dir).await?;

    let db_path = vigil_dir.join("vigil.db");
    let db_url = format!("sqlite:{}", db_path.display());
    initialize_database(&db_url, None)
        .await
        .context("Failed to initialize database")?;

    let out = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_initialized: true,
    };
    output(&out, json_mode);
    Ok(())
}

/// Project config with file logging under the project directory.
fn default_project_config() -> Config {
    Config {
        logging: LoggingConfig {
            log_dir: Some(format!("{CONFIG_DIR}/logs")),
            ..LoggingConfig::default()
        },
        ..Config::default()
    }
}

async fn write_default_config(vigil_dir: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(&default_project_config())
        .context("Failed to render default configuration")?;
    let contents = format!("# Vigil project configuration. VIGIL_* environment variables override these values.\n{yaml}");
    fs::write(vigil_dir.join("config.yaml"), contents)
        .await
        .context("Failed to write config.yaml")
}
