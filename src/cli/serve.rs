// src/cli/serve.rs
// Gateway initialization and the serve loop

use toolhub::config::HubConfig;
use toolhub::db::Database;
use toolhub::mcp::{serve, HubServer};
use toolhub::pool::{ChildPool, ProcessSpawner};
use toolhub::ranking::{ToolRanker, DEFAULT_EPSILON};
use toolhub::search::ToolIndex;
use toolhub::tracker::UsageTracker;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Run the gateway until stdin closes or a signal arrives.
pub async fn run_serve() -> Result<()> {
    let config_path = HubConfig::config_path();
    // The serve path never refuses to start over configuration: a broken
    // file degrades to an empty catalog that still answers meta-tools.
    let config = HubConfig::load_or_default(&config_path);
    info!(
        path = %config_path.display(),
        servers = config.servers.len(),
        "configuration loaded"
    );

    let store = Arc::new(Database::open(&Database::store_path()));
    if !store.is_enabled() {
        info!("usage store unavailable; tracking and ranking run disabled");
    }

    let pool = Arc::new(ChildPool::new(
        Arc::new(ProcessSpawner),
        Duration::from_secs(config.settings.timeout_seconds),
        config.settings.process_pool_size as usize,
    ));
    let index = Arc::new(ToolIndex::new());
    let tracker = Arc::new(UsageTracker::spawn(store.clone()));
    let ranker = ToolRanker::new(DEFAULT_EPSILON);

    let server = Arc::new(HubServer::new(
        config,
        config_path,
        pool,
        index,
        store,
        tracker,
        ranker,
    ));

    // Answer searches from cached metadata immediately; refresh with live
    // discovery in the background so startup never blocks on children.
    server.seed_index_from_metadata().await;
    let discovery = {
        let server = server.clone();
        tokio::spawn(async move {
            server.discover_all().await;
        })
    };

    let outcome = serve::serve(server).await;

    // serve() has already closed the pool; discovery can only be finishing
    // failed attempts at this point.
    discovery.abort();
    outcome
}
