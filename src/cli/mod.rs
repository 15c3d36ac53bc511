//! Operator command-line interface.

pub mod commands;
pub mod output;
pub mod types;

use anyhow::{Context, Result};
use std::path::Path;

use crate::adapters::sqlite::{initialize_database, PoolConfig};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{Collaborators, Engine};

pub use types::{Cli, Commands};

/// Load configuration from `path`, or from the project directory when unset.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Open the configured database and wire the engine over it.
pub async fn open_engine(config: &Config) -> Result<Engine> {
    let pool = initialize_database(&config.database.url(), Some(PoolConfig::from(&config.database)))
        .await
        .context("Failed to initialize database. Run 'vigil init' first.")?;
    Ok(Engine::new(pool, config.clone(), Collaborators::default()))
}

/// Report a command failure and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
