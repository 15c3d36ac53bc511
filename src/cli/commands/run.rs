//! Implementation of the `vigil run` command.

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::info;

use crate::cli::open_engine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the poll interval, in seconds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Only tick on the interval, ignoring task-complete events
    #[arg(long)]
    pub no_events: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    pub stopped: bool,
    pub poll_interval_secs: u64,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        "Orchestration poller stopped.".to_string()
    }
}

pub async fn execute(args: RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let mut config = config.clone();
    if let Some(interval) = args.interval {
        config.orchestration.poll_interval_secs = interval.max(1);
    }

    let engine = open_engine(&config).await?;
    let poller = engine.poller();
    let events = (!args.no_events).then(|| engine.publisher.subscribe());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping poller");
        }
        let _ = shutdown_tx.send(true);
    });

    poller
        .run(events, shutdown_rx)
        .await
        .context("Orchestration poller failed")?;
    signal.abort();

    output(
        &RunOutput {
            stopped: true,
            poll_interval_secs: config.orchestration.poll_interval_secs,
        },
        json_mode,
    );
    Ok(())
}
