// src/cli/verify.rs
// Spawn-and-handshake check of every configured server

use toolhub::config::HubConfig;
use toolhub::pool::{ChildPool, ProcessSpawner};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Connect to every registered server once and report per-server results.
pub async fn run_verify() -> Result<()> {
    let path = HubConfig::config_path();
    let config = HubConfig::load(&path)?;

    if config.servers.is_empty() {
        println!("No MCP servers registered in {}.", path.display());
        return Ok(());
    }

    let pool = ChildPool::new(
        Arc::new(ProcessSpawner),
        Duration::from_secs(config.settings.timeout_seconds),
        config.servers.len().max(1),
    );

    let mut failures = 0usize;
    for (name, server) in &config.servers {
        print!("{name}: ");
        match pool.get_tools(name, server).await {
            Ok(tools) => println!("ok ({} tools)", tools.len()),
            Err(e) => {
                failures += 1;
                println!("FAILED - {e}");
            }
        }
    }

    pool.close().await;

    if failures > 0 {
        println!(
            "\n{failures} of {} servers failed. Fix the entries in {} and re-run.",
            config.servers.len(),
            path.display()
        );
    } else {
        println!("\nAll {} servers verified.", config.servers.len());
    }
    Ok(())
}
