//! waypoint: command-line host for the agent runtime.

mod cli;
mod commands;
mod demo;
mod state;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = state::default_data_dir();
    tracing::debug!(data_dir = %data_dir.display(), "opening state");
    let state = state::AppState::open(data_dir)?;

    commands::execute(cli.command, &state).await
}
