// src/main.rs
// toolhub - aggregating MCP gateway

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the wire protocol; logs always go to stderr, and the
    // serve path stays quiet so a host client sees clean frames.
    let log_level = match &cli.command {
        None | Some(Commands::Serve) => Level::WARN,
        Some(Commands::List) => Level::WARN,
        Some(Commands::Verify) => Level::INFO,
        Some(Commands::Cleanup { .. }) => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        None | Some(Commands::Serve) => cli::run_serve().await,
        Some(Commands::List) => cli::run_list(),
        Some(Commands::Verify) => cli::run_verify().await,
        Some(Commands::Cleanup { days, dry_run }) => cli::run_cleanup(days, dry_run),
    }
}
