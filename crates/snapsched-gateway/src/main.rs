use std::sync::Arc;

use clap::Parser;
use snapsched_core::config::SnapSchedConfig;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod dispatch;
mod serve;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output and result frames; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snapsched_gateway=info,snapsched_scheduler=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // load config: --config > SNAPSCHED_CONFIG env > ~/.snapsched/snapsched.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("SNAPSCHED_CONFIG").ok());
    let config = SnapSchedConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        SnapSchedConfig::default()
    });

    let state = Arc::new(app::AppState::from_config(config)?);

    let Some(command) = cli.command.into_command() else {
        if let Err(e) = serve::run(state).await {
            error!(code = e.code(), "serve stopped: {e}");
            return Err(e.into());
        }
        return Ok(());
    };

    state.recover().await?;
    let result = dispatch::dispatch(&state, command).await;
    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    if !result.is_ok() {
        eprintln!("Error {}: {}", result.status, result.error);
        std::process::exit(1);
    }
    Ok(())
}
