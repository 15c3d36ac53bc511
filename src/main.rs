//! Vigil CLI entry point.

use clap::Parser;

use vigil::cli::commands;
use vigil::cli::{handle_error, load_config, Cli, Commands};
use vigil::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Run(args) => commands::run::execute(args, &config, cli.json).await,
        Commands::Queue(args) => commands::queue::execute(args, &config, cli.json).await,
        Commands::Tick(args) => commands::tick::execute(args, &config, cli.json).await,
        Commands::Status(args) => commands::status::execute(args, &config, cli.json).await,
        Commands::Entity(args) => commands::entity::execute(args, &config, cli.json).await,
        Commands::Task(args) => commands::task::execute(args, &config, cli.json).await,
        Commands::Config(args) => commands::config::execute(args, &config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
