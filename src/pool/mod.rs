// src/pool/mod.rs
// Child-process pool: lazy spawn, cached handles, two-phase teardown

pub mod child;
pub mod spawner;

pub use child::{ChildHandle, DEFAULT_REQUEST_TIMEOUT, MAX_REQUEST_ID};
pub use spawner::{ProcessSpawner, SpawnedChild, Spawner};

use crate::config::ServerConfig;
use crate::error::{HubError, Result};
use crate::search::ToolDocument;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default cap on simultaneously live children.
const DEFAULT_POOL_CAPACITY: usize = 3;

struct PoolEntry {
    handle: Arc<ChildHandle>,
    last_used: Instant,
}

/// Facade owning the name -> child mapping. All access to children goes
/// through `get_or_spawn`; the map itself is never shared.
pub struct ChildPool {
    children: Mutex<HashMap<String, PoolEntry>>,
    spawner: Arc<dyn Spawner>,
    request_timeout: Duration,
    capacity: usize,
}

impl ChildPool {
    pub fn new(spawner: Arc<dyn Spawner>, request_timeout: Duration, capacity: usize) -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            spawner,
            request_timeout,
            capacity,
        }
    }

    /// Pool with the fallback 60 s request deadline and default capacity,
    /// for callers with no settings in hand.
    pub fn with_defaults(spawner: Arc<dyn Spawner>) -> Self {
        Self::new(spawner, DEFAULT_REQUEST_TIMEOUT, DEFAULT_POOL_CAPACITY)
    }

    /// Return the cached child for `name` or spawn, handshake, and cache
    /// one. At capacity the least-recently-used child is retired first.
    ///
    /// The map lock is only ever held for lookups and inserts: the slow
    /// spawn/handshake and any retirement run unlocked, so one slow child
    /// never stalls requests to the others.
    pub async fn get_or_spawn(
        &self,
        name: &str,
        config: &ServerConfig,
    ) -> Result<Arc<ChildHandle>> {
        // Fast path: already connected.
        {
            let mut children = self.children.lock().await;
            if let Some(entry) = children.get_mut(name) {
                entry.last_used = Instant::now();
                return Ok(entry.handle.clone());
            }
        }

        let handle = Arc::new(
            ChildHandle::spawn(name, config, self.spawner.as_ref(), self.request_timeout).await?,
        );

        // Re-check under the lock: a concurrent caller may have connected
        // the same server while we were handshaking.
        let (winner, retired) = {
            let mut children = self.children.lock().await;
            if let Some(entry) = children.get_mut(name) {
                entry.last_used = Instant::now();
                (entry.handle.clone(), Some(handle))
            } else {
                let evicted = if self.capacity > 0 && children.len() >= self.capacity {
                    let oldest = children
                        .iter()
                        .min_by_key(|(_, entry)| entry.last_used)
                        .map(|(name, _)| name.clone());
                    oldest.and_then(|oldest| {
                        info!(server = %oldest, "pool at capacity, retiring least-recently-used child");
                        children.remove(&oldest).map(|entry| entry.handle)
                    })
                } else {
                    None
                };
                children.insert(
                    name.to_string(),
                    PoolEntry {
                        handle: handle.clone(),
                        last_used: Instant::now(),
                    },
                );
                (handle, evicted)
            }
        };

        if let Some(retired) = retired {
            retired.shutdown().await;
        }
        Ok(winner)
    }

    /// Drop and tear down one child (next call respawns it).
    pub async fn evict(&self, name: &str) {
        let entry = {
            let mut children = self.children.lock().await;
            children.remove(name)
        };
        if let Some(entry) = entry {
            warn!(server = %name, "evicting child from pool");
            entry.handle.shutdown().await;
        }
    }

    /// Serialized request against one child, evicting it on a crash.
    async fn request(&self, name: &str, config: &ServerConfig, method: &str, params: Value) -> Result<Value> {
        let handle = self.get_or_spawn(name, config).await?;
        match handle.send_request(method, params).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_fatal_for_child() {
                    self.evict(name).await;
                }
                Err(e)
            }
        }
    }

    /// `tools/list` against the child, parsed into index documents.
    pub async fn get_tools(&self, name: &str, config: &ServerConfig) -> Result<Vec<ToolDocument>> {
        let result = self.request(name, config, "tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .filter_map(|tool| {
                let tool_name = tool.get("name").and_then(Value::as_str)?.to_string();
                Some(ToolDocument {
                    name: tool_name,
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                    server: name.to_string(),
                })
            })
            .collect())
    }

    /// `tools/call` against the child; text content blocks joined.
    pub async fn execute_tool(
        &self,
        name: &str,
        config: &ServerConfig,
        tool: &str,
        arguments: Value,
    ) -> Result<String> {
        let result = self
            .request(
                name,
                config,
                "tools/call",
                json!({"name": tool, "arguments": arguments}),
            )
            .await?;

        let text: String = result
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(HubError::Child {
                server: name.to_string(),
                code: crate::mcp::protocol::INTERNAL_ERROR,
                message: if text.is_empty() {
                    format!("tool '{tool}' reported an error")
                } else {
                    text
                },
            });
        }

        if text.is_empty() {
            Ok("(empty result)".to_string())
        } else {
            Ok(text)
        }
    }

    /// Pretty-printed input schema for one discovered tool.
    pub async fn get_tool_help(
        &self,
        name: &str,
        config: &ServerConfig,
        tool: &str,
    ) -> Result<String> {
        let tools = self.get_tools(name, config).await?;
        let found = tools
            .iter()
            .find(|t| t.name == tool)
            .ok_or_else(|| HubError::UnknownTool {
                server: name.to_string(),
                tool: tool.to_string(),
            })?;

        let schema = serde_json::to_string_pretty(&found.input_schema)?;
        Ok(format!(
            "{}/{} - {}\n\nInput schema:\n{}",
            name,
            found.name,
            if found.description.is_empty() {
                "(no description)"
            } else {
                &found.description
            },
            schema
        ))
    }

    /// Two-phase teardown of every live child. Never panics; partial
    /// failures are logged by the handles themselves.
    pub async fn close(&self) {
        let entries: Vec<(String, PoolEntry)> = {
            let mut children = self.children.lock().await;
            children.drain().collect()
        };
        for (name, entry) in entries {
            debug!(server = %name, "closing child");
            entry.handle.shutdown().await;
        }
    }

    pub async fn live_count(&self) -> usize {
        self.children.lock().await.len()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.children.lock().await.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_for(command: &str, args: &[&str]) -> ServerConfig {
        ServerConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Write a fake MCP server as a shell script and return its path.
    fn fake_server_script(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("fake-server.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        path.to_string_lossy().into_owned()
    }

    /// A well-behaved child: answers initialize, tools/list, tools/call
    /// with correctly correlated ids (1, 2, 3 in request order).
    const WELL_BEHAVED: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0.0.0"}}}'
      ;;
    *'"method":"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo_text","description":"Echo text back.","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}'
      ;;
    *'"method":"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"echoed"}]}}'
      ;;
  esac
done
"#;

    #[tokio::test]
    async fn test_spawn_failure_leaves_pool_empty() {
        let pool = ChildPool::with_defaults(Arc::new(ProcessSpawner));
        let config = config_for("/nonexistent/toolhub-test-binary", &[]);

        let err = pool.get_or_spawn("ghost", &config).await.unwrap_err();
        assert!(matches!(err, HubError::Spawn { .. }), "got {err:?}");
        assert_eq!(pool.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_immediate_eof_fails_handshake() {
        let pool = ChildPool::with_defaults(Arc::new(ProcessSpawner));
        // `true` exits instantly, closing stdout before any response.
        let config = config_for("true", &[]);

        let err = pool.get_or_spawn("quitter", &config).await.unwrap_err();
        assert!(matches!(err, HubError::Handshake { .. }), "got {err:?}");
        assert!(err.to_string().contains("handshake"));
        assert!(!pool.contains("quitter").await);
    }

    #[tokio::test]
    async fn test_silent_child_times_out_and_close_is_bounded() {
        let pool = ChildPool::new(Arc::new(ProcessSpawner), Duration::from_millis(500), 3);
        let config = config_for("sleep", &["10"]);

        let started = Instant::now();
        let err = pool.get_or_spawn("sleeper", &config).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4), "timeout not honored");
        // The handshake timed out, so the child was killed and not cached.
        assert!(matches!(err, HubError::Handshake { .. }), "got {err:?}");
        assert!(!pool.contains("sleeper").await);

        let close_started = Instant::now();
        pool.close().await;
        assert!(close_started.elapsed() < Duration::from_millis(2500));
        assert_eq!(pool.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_round_trip_with_fake_server() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_server_script(dir.path(), WELL_BEHAVED);
        let pool = ChildPool::with_defaults(Arc::new(ProcessSpawner));
        let config = config_for("sh", &[script.as_str()]);

        let tools = pool.get_tools("fake", &config).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo_text");
        assert_eq!(tools[0].server, "fake");

        let output = pool
            .execute_tool("fake", &config, "echo_text", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(output, "echoed");

        // Same cached child served both calls.
        assert_eq!(pool.live_count().await, 1);

        // Ids are strictly monotone: initialize=1, tools/list=2, tools/call=3.
        let handle = pool.get_or_spawn("fake", &config).await.unwrap();
        assert_eq!(handle.last_request_id(), 3);
        assert!(handle.last_request_id() <= MAX_REQUEST_ID);

        pool.close().await;
        assert_eq!(pool.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_tool_help_renders_schema() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_server_script(dir.path(), WELL_BEHAVED);
        let pool = ChildPool::with_defaults(Arc::new(ProcessSpawner));
        let config = config_for("sh", &[script.as_str()]);

        let help = pool.get_tool_help("fake", &config, "echo_text").await.unwrap();
        assert!(help.contains("fake/echo_text"));
        assert!(help.contains("\"type\": \"object\""));

        pool.close().await;
    }

    #[tokio::test]
    async fn test_stderr_flood_does_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        // 2048 * 64 B = 128 KiB of stderr before the first response: well
        // past the OS pipe buffer. Only the drain keeps this alive.
        let body = r#"
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      i=0
      while [ $i -lt 2048 ]; do printf '%064d' 0 >&2; i=$((i+1)); done
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"noisy","version":"0.0.0"}}}'
      ;;
    *'"method":"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'
      ;;
  esac
done
"#;
        let script = fake_server_script(dir.path(), body);
        let pool = ChildPool::new(Arc::new(ProcessSpawner), Duration::from_secs(10), 3);
        let config = config_for("sh", &[script.as_str()]);

        let tools = pool.get_tools("noisy", &config).await.unwrap();
        assert!(tools.is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_capacity_retires_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_server_script(dir.path(), WELL_BEHAVED);
        let pool = ChildPool::new(Arc::new(ProcessSpawner), Duration::from_secs(10), 2);
        let config = config_for("sh", &[script.as_str()]);

        pool.get_or_spawn("one", &config).await.unwrap();
        pool.get_or_spawn("two", &config).await.unwrap();
        pool.get_or_spawn("three", &config).await.unwrap();

        assert_eq!(pool.live_count().await, 2);
        assert!(!pool.contains("one").await);
        assert!(pool.contains("three").await);

        pool.close().await;
    }
}
