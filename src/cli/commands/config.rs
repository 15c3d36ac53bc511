//! Implementation of the `vigil config` command.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the merged configuration
    Show,
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigOutput {
    #[serde(flatten)]
    pub config: Config,
    #[serde(skip)]
    pub yaml: String,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        self.yaml.trim_end().to_string()
    }
}

pub fn execute(args: ConfigArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
            output(
                &ConfigOutput {
                    config: config.clone(),
                    yaml,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
