use clap::Parser;
use tracing::{info, warn};

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "scout_daemon=debug,scout_scheduler=debug,scout_agent=debug"
    } else {
        "scout_daemon=info,scout_scheduler=info,scout_agent=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    // load config: --config / SCOUT_CONFIG > ~/.scout/scout.toml
    let config = scout_core::ScoutConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({e}), using defaults");
        scout_core::ScoutConfig::default()
    });

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                "starting scout scheduler"
            );
            commands::run(config).await
        }
        Commands::Enqueue { config_id } => commands::enqueue(&config, &config_id),
        Commands::Show { execution_id } => commands::show(&config, &execution_id),
        Commands::Recent {
            config_id,
            state,
            limit,
        } => commands::recent(&config, &config_id, state, limit),
        Commands::Configs => commands::configs(&config),
    }
}
