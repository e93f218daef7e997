// src/search/index.rs
// Inverted index with BM25 scoring over tool name/description text

use crate::search::{SearchHit, ToolDocument};
use std::collections::HashMap;
use std::sync::RwLock;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Term weight applied to tool-name tokens relative to description tokens.
const NAME_TOKEN_WEIGHT: f64 = 2.0;

#[derive(Default)]
struct IndexInner {
    /// doc id -> document
    docs: HashMap<String, ToolDocument>,
    /// server -> doc ids owned by that server
    server_docs: HashMap<String, Vec<String>>,
    /// term -> doc id -> weighted term frequency
    postings: HashMap<String, HashMap<String, f64>>,
    /// doc id -> weighted document length
    doc_len: HashMap<String, f64>,
    total_len: f64,
}

/// Shared in-memory index. Writes are batched per server; reads take the
/// shared lock and never block other reads.
pub struct ToolIndex {
    inner: RwLock<IndexInner>,
}

impl Default for ToolIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
        }
    }

    /// Replace every document for `server` in one write-lock scope.
    pub fn index_server(&self, server: &str, tools: Vec<ToolDocument>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        remove_server_locked(&mut inner, server);

        let mut ids = Vec::with_capacity(tools.len());
        for tool in tools {
            let doc_id = tool.doc_id();
            let mut len = 0.0;

            for token in tokenize(&tool.name) {
                add_posting(&mut inner, &token, &doc_id, NAME_TOKEN_WEIGHT);
                len += NAME_TOKEN_WEIGHT;
            }
            for token in tokenize(&tool.description) {
                add_posting(&mut inner, &token, &doc_id, 1.0);
                len += 1.0;
            }
            // Server-name tokens make server-shaped queries ("jira") land
            // on that server's tools even when the tool text never says so.
            for token in tokenize(&tool.server) {
                add_posting(&mut inner, &token, &doc_id, 1.0);
                len += 1.0;
            }

            inner.doc_len.insert(doc_id.clone(), len);
            inner.total_len += len;
            ids.push(doc_id.clone());
            inner.docs.insert(doc_id, tool);
        }

        inner.server_docs.insert(server.to_string(), ids);
    }

    /// Drop every document whose id is prefixed by `server/`.
    pub fn remove_server(&self, server: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        remove_server_locked(&mut inner, server);
    }

    /// Top `limit` documents for `query`, best first. Empty queries match
    /// nothing.
    pub fn search_bm25(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        search_locked(&inner, query, None, limit)
    }

    /// Same scoring, conjunctively filtered to one server.
    pub fn search_by_server(&self, query: &str, server: &str, limit: usize) -> Vec<SearchHit> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        search_locked(&inner, query, Some(server), limit)
    }

    /// Match-everything retrieval in stable doc-id order.
    pub fn get_all_tools(&self, limit: usize) -> Vec<ToolDocument> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<&String> = inner.docs.keys().collect();
        ids.sort();
        ids.into_iter()
            .take(limit)
            .filter_map(|id| inner.docs.get(id).cloned())
            .collect()
    }

    /// Total indexed document count.
    pub fn count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.docs.len()
    }

    /// Document count for one server.
    pub fn server_doc_count(&self, server: &str) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .server_docs
            .get(server)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }
}

fn add_posting(inner: &mut IndexInner, token: &str, doc_id: &str, weight: f64) {
    *inner
        .postings
        .entry(token.to_string())
        .or_default()
        .entry(doc_id.to_string())
        .or_insert(0.0) += weight;
}

fn remove_server_locked(inner: &mut IndexInner, server: &str) {
    let Some(ids) = inner.server_docs.remove(server) else {
        return;
    };
    for id in ids {
        inner.docs.remove(&id);
        if let Some(len) = inner.doc_len.remove(&id) {
            inner.total_len -= len;
        }
        inner.postings.retain(|_, docs| {
            docs.remove(&id);
            !docs.is_empty()
        });
    }
}

fn search_locked(
    inner: &IndexInner,
    query: &str,
    server: Option<&str>,
    limit: usize,
) -> Vec<SearchHit> {
    let terms = tokenize(query);
    if terms.is_empty() || inner.docs.is_empty() {
        return Vec::new();
    }

    let doc_count = inner.docs.len() as f64;
    let avg_len = (inner.total_len / doc_count).max(1.0);

    let mut scores: HashMap<&String, f64> = HashMap::new();
    for term in &terms {
        let Some(postings) = inner.postings.get(term) else {
            continue;
        };
        let df = postings.len() as f64;
        let idf = (1.0 + (doc_count - df + 0.5) / (df + 0.5)).ln();

        for (doc_id, tf) in postings {
            let Some(doc) = inner.docs.get(doc_id) else {
                continue;
            };
            if let Some(wanted) = server {
                if doc.server != wanted {
                    continue;
                }
            }
            let len = inner.doc_len.get(doc_id).copied().unwrap_or(1.0);
            let norm = tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len));
            *scores.entry(doc_id).or_insert(0.0) += idf * norm;
        }
    }

    let mut hits: Vec<SearchHit> = scores
        .into_iter()
        .filter(|(_, score)| *score > 0.0)
        .filter_map(|(doc_id, score)| {
            inner.docs.get(doc_id).map(|tool| SearchHit {
                tool: tool.clone(),
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tool.doc_id().cmp(&b.tool.doc_id()))
    });
    hits.truncate(limit);
    hits
}

/// Lowercased alphanumeric tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
