// tests/integration.rs
// End-to-end scenarios over the gateway with fake shell-script children

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolhub::config::{HubConfig, ServerConfig};
use toolhub::db::Database;
use toolhub::mcp::HubServer;
use toolhub::pool::{ChildPool, ProcessSpawner};
use toolhub::ranking::ToolRanker;
use toolhub::search::ToolIndex;
use toolhub::tracker::{TrackedEvent, UsageTracker};

fn gateway(config: HubConfig) -> Arc<HubServer> {
    gateway_with_pool(config, ChildPool::with_defaults(Arc::new(ProcessSpawner)))
}

fn gateway_with_pool(config: HubConfig, pool: ChildPool) -> Arc<HubServer> {
    let store = Arc::new(Database::open_in_memory());
    Arc::new(HubServer::new(
        config,
        PathBuf::from("/tmp/toolhub-it-config.json"),
        Arc::new(pool),
        Arc::new(ToolIndex::new()),
        store.clone(),
        Arc::new(UsageTracker::spawn(store)),
        ToolRanker::with_seed(0.0, 11),
    ))
}

fn server_entry(command: &str, args: &[&str]) -> ServerConfig {
    ServerConfig {
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        source: "test".to_string(),
        ..Default::default()
    }
}

async fn request(server: &HubServer, method: &str, params: Value) -> Value {
    let line = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}).to_string();
    let response = server.handle_message(&line).await.expect("expected a response");
    assert!(
        response.error.is_none(),
        "unexpected error: {:?}",
        response.error
    );
    response.result.unwrap()
}

async fn call_meta_tool(server: &HubServer, name: &str, args: Value) -> String {
    let result = request(
        server,
        "tools/call",
        json!({"name": name, "arguments": args}),
    )
    .await;
    result["content"][0]["text"].as_str().unwrap().to_string()
}

/// Write a fake MCP child that answers initialize (id 1) and tools/list
/// (id 2) with the given tool array.
fn fake_child(dir: &std::path::Path, file_name: &str, tools_json: &str) -> String {
    const TEMPLATE: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
      ;;
    *'"method":"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":__TOOLS__}}'
      ;;
  esac
done
"#;
    let path = dir.join(file_name);
    let script = TEMPLATE.replace("__TOOLS__", tools_json);
    std::fs::write(&path, script).unwrap();
    path.to_string_lossy().into_owned()
}

// Scenario: one configured server; the catalog's schemas enumerate it.
#[tokio::test]
async fn catalog_enums_follow_configuration() {
    let mut config = HubConfig::default();
    config
        .insert_server("jira", server_entry("echo", &["hi"]))
        .unwrap();
    let server = gateway(config);

    let result = request(&server, "tools/list", json!({})).await;
    let tools = result["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 5);

    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        ["hub_list", "hub_discover", "hub_search", "hub_execute", "hub_help"]
    );

    for tool in tools {
        if let Some(server_prop) = tool["inputSchema"]["properties"].get("server") {
            assert_eq!(server_prop["enum"], json!(["jira"]));
        }
    }
}

// Scenario: empty configuration; hub_search still answers the flat shape.
#[tokio::test]
async fn empty_config_search_returns_flat_empty_body() {
    let server = gateway(HubConfig::default());

    let text = call_meta_tool(&server, "hub_search", json!({"query": "create issue"})).await;
    let body: Value = serde_json::from_str(&text).unwrap();

    assert!(!body["searchId"].as_str().unwrap().is_empty());
    assert_eq!(body["query"], "create issue");
    assert_eq!(body["totalResults"], 0);
    assert_eq!(body["results"], json!([]));
    assert_eq!(body["failedServers"], json!([]));
}

// Scenario: two servers discovered end-to-end through real child
// processes; a server-shaped query ranks that server's tools first and a
// scoped query stays inside its server.
#[tokio::test]
async fn search_after_discovery_ranks_and_scopes_by_server() {
    let dir = tempfile::tempdir().unwrap();
    let jira = fake_child(
        dir.path(),
        "jira.sh",
        r#"[{"name":"create_issue","description":"Create a new issue","inputSchema":{"type":"object"}}]"#,
    );
    let github = fake_child(
        dir.path(),
        "github.sh",
        r#"[{"name":"create_pr","description":"Open a pull request","inputSchema":{"type":"object"}}]"#,
    );

    let mut config = HubConfig::default();
    config
        .insert_server("jira", server_entry("sh", &[jira.as_str()]))
        .unwrap();
    config
        .insert_server("github", server_entry("sh", &[github.as_str()]))
        .unwrap();
    let server = gateway(config);

    let discovered = call_meta_tool(&server, "hub_discover", json!({"server": "jira"})).await;
    assert!(discovered.contains("create_issue: Create a new issue"));
    call_meta_tool(&server, "hub_discover", json!({"server": "github"})).await;

    let text = call_meta_tool(&server, "hub_search", json!({"query": "jira"})).await;
    let body: Value = serde_json::from_str(&text).unwrap();
    assert!(body["totalResults"].as_u64().unwrap() >= 1);
    assert_eq!(body["results"][0]["server"], "jira");
    assert_eq!(body["failedServers"], json!([]));

    let scoped = call_meta_tool(
        &server,
        "hub_search",
        json!({"query": "jira", "server": "github"}),
    )
    .await;
    let scoped_body: Value = serde_json::from_str(&scoped).unwrap();
    for hit in scoped_body["results"].as_array().unwrap() {
        assert_eq!(hit["server"], "github");
    }

    server.shutdown().await;
}

// A verbose child cannot blow up the discover listing: descriptions are
// capped with an ellipsis.
#[tokio::test]
async fn discover_trims_long_descriptions() {
    let dir = tempfile::tempdir().unwrap();
    let long_description = "x".repeat(300);
    let verbose = fake_child(
        dir.path(),
        "verbose.sh",
        &format!(
            r#"[{{"name":"wordy_tool","description":"{long_description}","inputSchema":{{"type":"object"}}}}]"#
        ),
    );

    let mut config = HubConfig::default();
    config
        .insert_server("verbose", server_entry("sh", &[verbose.as_str()]))
        .unwrap();
    let server = gateway(config);

    let listing = call_meta_tool(&server, "hub_discover", json!({"server": "verbose"})).await;
    let line = listing
        .lines()
        .find(|l| l.starts_with("wordy_tool:"))
        .unwrap();
    assert!(line.ends_with("..."));
    assert!(line.len() < long_description.len());

    server.shutdown().await;
}

// Scenario: ranking with a clear favorite is deterministic at epsilon 0
// and roughly uniform at epsilon 1.
#[tokio::test]
async fn ranking_exploits_and_explores() {
    let db = Database::open_in_memory();
    let now = chrono::Utc::now().timestamp();

    for i in 0..5i64 {
        db.record_usage(&toolhub::db::UsageEvent {
            tool_name: "tool_a".to_string(),
            context_hash: "h".to_string(),
            timestamp: now - 300 - i * 60,
            selected: true,
            rating: 5,
            was_recommended: false,
            session_id: None,
        });
    }
    db.record_usage(&toolhub::db::UsageEvent {
        tool_name: "tool_b".to_string(),
        context_hash: "h".to_string(),
        timestamp: now - 86_400,
        selected: true,
        rating: 3,
        was_recommended: false,
        session_id: None,
    });

    let candidates = vec!["tool_a".to_string(), "tool_b".to_string()];

    let exploit = ToolRanker::with_seed(0.0, 5);
    assert_eq!(
        exploit.rank(&candidates, &db),
        vec!["tool_a".to_string(), "tool_b".to_string()]
    );

    let explore = ToolRanker::with_seed(1.0, 99);
    let mut a_first = 0u32;
    for _ in 0..1000 {
        if explore.rank(&candidates, &db)[0] == "tool_a" {
            a_first += 1;
        }
    }
    let frequency = f64::from(a_first) / 1000.0;
    assert!(
        (frequency - 0.5).abs() < 0.05,
        "exploration skewed: {frequency}"
    );
}

// Scenario: a child that never speaks MCP fails within the configured
// bound and teardown still completes within its two-second grace.
#[tokio::test]
async fn silent_child_times_out_and_close_is_fast() {
    let pool = ChildPool::new(Arc::new(ProcessSpawner), Duration::from_millis(500), 3);
    let config = server_entry("sleep", &["10"]);

    let started = Instant::now();
    let result = pool.get_tools("sleeper", &config).await;
    assert!(result.is_err());
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "timeout bound not honored: {:?}",
        started.elapsed()
    );
    assert!(!pool.contains("sleeper").await);

    let close_started = Instant::now();
    pool.close().await;
    assert!(close_started.elapsed() < Duration::from_millis(2500));
    assert_eq!(pool.live_count().await, 0);
}

// Scenario: concurrent producers; after stop the store holds every event.
#[tokio::test]
async fn concurrent_tracking_is_lossless_within_capacity() {
    let store = Arc::new(Database::open_in_memory());
    let tracker = Arc::new(UsageTracker::spawn(store.clone()));

    let mut producers = Vec::new();
    for _ in 0..10 {
        let tracker = tracker.clone();
        producers.push(tokio::spawn(async move {
            for _ in 0..100 {
                tracker.track(TrackedEvent::Usage(toolhub::db::UsageEvent::executed(
                    "tool_x", "hash", None,
                )));
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    tracker.stop().await;
    assert_eq!(store.count_events_for_tool("tool_x"), 1000);
}

// Execution through a real child records a usage event with the search
// session's recommendation flag resolved.
#[tokio::test]
async fn execute_records_usage_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echoer.sh");
    std::fs::write(
        &path,
        r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"echoer","version":"0"}}}'
      ;;
    *'"method":"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"done"}]}}'
      ;;
  esac
done
"#,
    )
    .unwrap();
    let script = path.to_string_lossy().into_owned();

    let mut config = HubConfig::default();
    config
        .insert_server("echoer", server_entry("sh", &[script.as_str()]))
        .unwrap();
    let server = gateway(config);

    let output = call_meta_tool(
        &server,
        "hub_execute",
        json!({"server": "echoer", "tool": "run", "arguments": {"x": 1}}),
    )
    .await;
    assert_eq!(output, "done");

    server.tracker.stop().await;
    let events = server.store.events_for_tool_since("echoer/run", 0);
    assert_eq!(events.len(), 1);
    assert!(events[0].selected);
    // The context hash is a digest, never the plaintext arguments.
    assert_eq!(events[0].context_hash.len(), 64);
    assert!(!events[0].context_hash.contains('{'));

    server.pool.close().await;
}
