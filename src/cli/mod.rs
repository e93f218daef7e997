// src/cli/mod.rs
// CLI surface for the gateway

use clap::{Parser, Subcommand};

pub mod serve;
pub mod verify;

pub use serve::run_serve;
pub use verify::run_verify;

use toolhub::config::HubConfig;
use toolhub::db::{Database, DEFAULT_RETENTION_DAYS};
use anyhow::Result;

#[derive(Parser)]
#[command(name = "toolhub")]
#[command(about = "Aggregating MCP gateway - one endpoint, five meta-tools, many servers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as MCP gateway on stdio (default)
    Serve,

    /// List registered servers and their provenance
    List,

    /// Spawn and handshake every configured server, reporting failures
    Verify,

    /// Delete usage events older than the retention horizon
    Cleanup {
        /// Retention horizon in days
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: u32,

        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

/// Print the registered servers with provenance and cached tool counts.
pub fn run_list() -> Result<()> {
    let path = HubConfig::config_path();
    let config = HubConfig::load(&path)?;

    if config.servers.is_empty() {
        println!("No MCP servers registered in {}.", path.display());
        println!("Add entries under \"servers\" and run `toolhub verify`.");
        return Ok(());
    }

    println!("Servers in {}:", path.display());
    for (name, server) in &config.servers {
        let source = if server.source.is_empty() {
            "unknown"
        } else {
            &server.source
        };
        let cached = server
            .metadata
            .as_ref()
            .map(|m| m.tools.len())
            .unwrap_or(0);
        if cached > 0 {
            println!("  {name} (source: {source}, {cached} cached tools)");
        } else {
            println!("  {name} (source: {source})");
        }
    }
    Ok(())
}

/// Retention sweep over the usage store.
pub fn run_cleanup(days: u32, dry_run: bool) -> Result<()> {
    let path = Database::store_path();
    let db = Database::open(&path);
    if !db.is_enabled() {
        println!(
            "Usage store at {} is unavailable; nothing to clean.",
            path.display()
        );
        return Ok(());
    }

    if dry_run {
        let candidates = db.count_sweep_candidates(days);
        let total: usize = candidates.iter().map(|(_, count)| count).sum();
        for (table, count) in &candidates {
            println!("{table}: {count} rows older than {days} days");
        }
        println!("Dry run: {total} rows would be deleted from {}.", path.display());
    } else {
        let deleted = db.sweep_older_than(days);
        println!(
            "Deleted {deleted} rows older than {days} days from {}.",
            path.display()
        );
    }
    Ok(())
}
