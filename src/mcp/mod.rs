// src/mcp/mod.rs
// The client-facing gateway: meta-tool dispatch over JSON-RPC/stdio

pub mod catalog;
pub mod protocol;
pub mod serve;

use crate::config::{HubConfig, ServerConfig};
use crate::db::{Database, SearchRecord, UsageEvent};
use crate::error::{HubError, Result};
use crate::pool::ChildPool;
use crate::ranking::ToolRanker;
use crate::search::{SearchHit, ToolDocument, ToolIndex};
use crate::tracker::{TrackedEvent, UsageTracker};
use crate::utils::{sha256_hex, truncate};
use self::protocol::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default result count for `hub_search`.
const DEFAULT_SEARCH_LIMIT: usize = 10;

/// How many top-ranked hits per search count as "recommended".
const RECOMMENDED_TOP_N: usize = 3;

/// Remembered search sessions for `wasRecommended` correlation.
const RECOMMENDED_SESSIONS_KEPT: usize = 100;

/// Character cap on tool descriptions in discover listings. The listing
/// exists to save tokens; one verbose child must not blow it up.
const DISCOVER_DESCRIPTION_CHARS: usize = 200;

/// Bounded memory of which tools recent searches recommended.
#[derive(Default)]
struct RecommendedLog {
    order: VecDeque<String>,
    by_session: HashMap<String, HashSet<String>>,
}

impl RecommendedLog {
    fn push(&mut self, session_id: String, doc_ids: HashSet<String>) {
        while self.order.len() >= RECOMMENDED_SESSIONS_KEPT {
            if let Some(evicted) = self.order.pop_front() {
                self.by_session.remove(&evicted);
            }
        }
        self.order.push_back(session_id.clone());
        self.by_session.insert(session_id, doc_ids);
    }

    fn was_recommended(&self, session_id: &str, doc_id: &str) -> bool {
        self.by_session
            .get(session_id)
            .is_some_and(|set| set.contains(doc_id))
    }
}

/// Gateway state: one instance serves the whole stdio connection.
pub struct HubServer {
    /// Configuration snapshot; replaced atomically on reload.
    config: RwLock<HubConfig>,
    config_path: PathBuf,
    pub pool: Arc<ChildPool>,
    pub index: Arc<ToolIndex>,
    pub store: Arc<Database>,
    pub tracker: Arc<UsageTracker>,
    ranker: ToolRanker,
    /// Servers whose last discovery attempt failed.
    failed_servers: RwLock<BTreeSet<String>>,
    recommended: RwLock<RecommendedLog>,
}

impl HubServer {
    pub fn new(
        config: HubConfig,
        config_path: PathBuf,
        pool: Arc<ChildPool>,
        index: Arc<ToolIndex>,
        store: Arc<Database>,
        tracker: Arc<UsageTracker>,
        ranker: ToolRanker,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            pool,
            index,
            store,
            tracker,
            ranker,
            failed_servers: RwLock::new(BTreeSet::new()),
            recommended: RwLock::new(RecommendedLog::default()),
        }
    }

    /// Handle one inbound frame. `None` means no response is produced
    /// (notifications, by contract, get none).
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("parse error: {e}"),
                ));
            }
        };

        if request.is_notification() {
            debug!(method = %request.method, "ignoring notification");
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "tools/list" => self.handle_tools_list(request.id).await,
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            other => JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };
        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "toolhub",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    async fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let names = self.config.read().await.server_names();
        let tools = catalog::meta_tool_catalog(&names);
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let outcome = match tool_name {
            "hub_list" => self.hub_list().await,
            "hub_discover" => self.hub_discover(&args).await,
            "hub_search" => self.hub_search(&args).await,
            "hub_execute" => self.hub_execute(&args).await,
            "hub_help" => self.hub_help(&args).await,
            other => {
                return JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("unknown tool: {other}"),
                );
            }
        };

        match outcome {
            Ok(text) => JsonRpcResponse::success(
                id,
                json!({ "content": [{ "type": "text", "text": text }] }),
            ),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Meta-tools
    // ------------------------------------------------------------------

    async fn hub_list(&self) -> Result<String> {
        let config = self.config.read().await;
        if config.servers.is_empty() {
            return Ok(
                "No MCP servers registered. Run setup to import servers, or add entries \
                 to ~/.tool-hub-mcp.json and restart the gateway."
                    .to_string(),
            );
        }

        let lines: Vec<String> = config
            .servers
            .iter()
            .map(|(name, server)| {
                let source = if server.source.is_empty() {
                    "unknown"
                } else {
                    &server.source
                };
                format!("{name} (source: {source})")
            })
            .collect();
        Ok(lines.join("\n"))
    }

    async fn hub_discover(&self, args: &Value) -> Result<String> {
        let server = required_str(args, "server")?;
        let config = self.server_config(server).await?;

        match self.pool.get_tools(server, &config).await {
            Ok(tools) => {
                self.index.index_server(server, tools.clone());
                self.failed_servers.write().await.remove(server);
                self.cache_metadata(server, &tools).await;

                if tools.is_empty() {
                    return Ok(format!("Server '{server}' exports no tools."));
                }
                let lines: Vec<String> = tools
                    .iter()
                    .map(|tool| {
                        let description = if tool.description.is_empty() {
                            "(no description)".to_string()
                        } else {
                            truncate(&tool.description, DISCOVER_DESCRIPTION_CHARS)
                        };
                        format!("{}: {}", tool.name, description)
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            Err(e) => {
                self.failed_servers
                    .write()
                    .await
                    .insert(server.to_string());
                Err(e)
            }
        }
    }

    async fn hub_search(&self, args: &Value) -> Result<String> {
        let query = required_str(args, "query")?;
        let server_filter = args.get("server").and_then(Value::as_str);
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| (n.max(1)) as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT);

        if let Some(server) = server_filter {
            // The schema restricts this with an enum; enforce it anyway.
            self.server_config(server).await?;
        }

        let search_id = uuid::Uuid::new_v4().to_string();
        let server_names = self.config.read().await.server_names();

        // Degraded path: servers exist but nothing is indexed yet.
        if !server_names.is_empty() && self.index.count() == 0 {
            self.record_search(&search_id, query, 0);
            return Ok(self.search_fallback(query, &server_names));
        }

        let mut hits = match server_filter {
            Some(server) => self.index.search_by_server(query, server, limit),
            None => self.index.search_bm25(query, limit),
        };
        self.apply_usage_ordering(&search_id, &mut hits).await;

        self.record_search(&search_id, query, hits.len() as u32);

        let failed: Vec<String> = self.failed_servers.read().await.iter().cloned().collect();
        let body = json!({
            "searchId": search_id,
            "query": query,
            "totalResults": hits.len(),
            "results": hits,
            "failedServers": failed,
        });
        Ok(serde_json::to_string(&body)?)
    }

    async fn hub_execute(&self, args: &Value) -> Result<String> {
        let server = required_str(args, "server")?;
        let tool = required_str(args, "tool")?;
        let arguments = args
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let session_id = args
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from);

        let config = self.server_config(server).await?;
        let doc_id = format!("{server}/{tool}");

        let was_recommended = match &session_id {
            Some(session) => self
                .recommended
                .read()
                .await
                .was_recommended(session, &doc_id),
            None => false,
        };

        let context_hash = sha256_hex(arguments.to_string().as_bytes());
        let result = self.pool.execute_tool(server, &config, tool, arguments).await;

        // Every execution attempt is recorded, success or not.
        let mut event = UsageEvent::executed(&doc_id, &context_hash, session_id);
        event.was_recommended = was_recommended;
        self.tracker.track(TrackedEvent::Usage(event));

        result
    }

    async fn hub_help(&self, args: &Value) -> Result<String> {
        let server = required_str(args, "server")?;
        let tool = required_str(args, "tool")?;
        let config = self.server_config(server).await?;
        self.pool.get_tool_help(server, &config, tool).await
    }

    // ------------------------------------------------------------------
    // Index lifecycle
    // ------------------------------------------------------------------

    /// Seed the index from cached metadata so search answers before any
    /// child has been spawned. Servers already indexed are left alone.
    pub async fn seed_index_from_metadata(&self) {
        let config = self.config.read().await;
        for (name, server) in &config.servers {
            let Some(metadata) = &server.metadata else {
                continue;
            };
            if metadata.tools.is_empty() || self.index.server_doc_count(name) > 0 {
                continue;
            }
            let docs: Vec<ToolDocument> = metadata
                .tools
                .iter()
                .map(|tool| ToolDocument {
                    name: tool.clone(),
                    description: String::new(),
                    input_schema: json!({"type": "object"}),
                    server: name.clone(),
                })
                .collect();
            debug!(server = %name, tools = docs.len(), "seeding index from cached metadata");
            self.index.index_server(name, docs);
        }
    }

    /// Discover every configured server through the pool and index the
    /// real tool documents. Failures are recorded, never propagated.
    pub async fn discover_all(&self) {
        let servers: Vec<(String, ServerConfig)> = {
            let config = self.config.read().await;
            config
                .servers
                .iter()
                .map(|(name, server)| (name.clone(), server.clone()))
                .collect()
        };

        for (name, config) in servers {
            match self.pool.get_tools(&name, &config).await {
                Ok(tools) => {
                    info!(server = %name, tools = tools.len(), "discovered server");
                    self.index.index_server(&name, tools.clone());
                    self.failed_servers.write().await.remove(&name);
                    self.cache_metadata(&name, &tools).await;
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "background discovery failed");
                    self.failed_servers.write().await.insert(name);
                }
            }
        }
    }

    /// Idempotent config reload: swap the snapshot atomically, then
    /// re-index in the background.
    pub async fn reload_config(self: &Arc<Self>) {
        let fresh = HubConfig::load_or_default(&self.config_path);
        let removed: Vec<String> = {
            let mut config = self.config.write().await;
            let removed = config
                .servers
                .keys()
                .filter(|name| !fresh.servers.contains_key(*name))
                .cloned()
                .collect();
            *config = fresh;
            removed
        };
        for name in removed {
            self.index.remove_server(&name);
            self.pool.evict(&name).await;
        }

        let server = self.clone();
        tokio::spawn(async move {
            server.seed_index_from_metadata().await;
            server.discover_all().await;
        });
    }

    /// Teardown chain: drain the tracker, then close every child.
    pub async fn shutdown(&self) {
        self.tracker.stop().await;
        self.pool.close().await;
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn server_config(&self, server: &str) -> Result<ServerConfig> {
        self.config
            .read()
            .await
            .servers
            .get(server)
            .cloned()
            .ok_or_else(|| HubError::UnknownServer(server.to_string()))
    }

    /// Keep BM25 relevance as the primary order; break score ties by the
    /// bandit's ranking and remember its top picks for `wasRecommended`.
    async fn apply_usage_ordering(&self, search_id: &str, hits: &mut [SearchHit]) {
        if hits.is_empty() {
            return;
        }
        let candidates: Vec<String> = hits.iter().map(|hit| hit.tool.doc_id()).collect();
        let ranked = self.ranker.rank(&candidates, &self.store);
        let position: HashMap<&str, usize> = ranked
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let pa = position.get(a.tool.doc_id().as_str()).copied();
                    let pb = position.get(b.tool.doc_id().as_str()).copied();
                    pa.cmp(&pb)
                })
        });

        let top: HashSet<String> = ranked.into_iter().take(RECOMMENDED_TOP_N).collect();
        self.recommended
            .write()
            .await
            .push(search_id.to_string(), top);
    }

    fn record_search(&self, search_id: &str, query: &str, results_count: u32) {
        self.tracker.track(TrackedEvent::Search(SearchRecord {
            session_id: search_id.to_string(),
            query_hash: sha256_hex(query.as_bytes()),
            timestamp: chrono::Utc::now().timestamp(),
            results_count,
        }));
    }

    /// Server-name matching for the not-yet-indexed case: lowercased
    /// containment in either direction, with the full list as a last
    /// resort.
    fn search_fallback(&self, query: &str, server_names: &[String]) -> String {
        let query_lower = query.to_lowercase();
        let matches: Vec<&String> = server_names
            .iter()
            .filter(|name| {
                let name_lower = name.to_lowercase();
                name_lower.contains(&query_lower) || query_lower.contains(&name_lower)
            })
            .collect();

        if matches.is_empty() {
            format!(
                "No tool index is available yet and no server name matches '{}'. \
                 Registered servers: {}. Call hub_discover with one of them to list its tools.",
                query,
                server_names.join(", ")
            )
        } else {
            let names: Vec<&str> = matches.iter().map(|name| name.as_str()).collect();
            format!(
                "Tool index still warming up; matching servers by name: {}. \
                 Call hub_discover with one of them to list its tools.",
                names.join(", ")
            )
        }
    }

    async fn cache_metadata(&self, server: &str, tools: &[ToolDocument]) {
        let mut config = self.config.write().await;
        if !config.settings.cache_tool_metadata {
            return;
        }
        if let Some(entry) = config.servers.get_mut(server) {
            let metadata = entry.metadata.get_or_insert_with(Default::default);
            metadata.tools = tools.iter().map(|tool| tool.name.clone()).collect();
            metadata.last_updated = Some(chrono::Utc::now().to_rfc3339());
        }
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HubError::InvalidParams(format!("missing required parameter '{field}'")))
}
