// src/search/mod.rs
// In-process retrieval over (server, tool) documents

pub mod hybrid;
pub mod index;

pub use index::ToolIndex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One indexed tool, identified by the `server/name` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDocument {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server: String,
}

impl ToolDocument {
    pub fn doc_id(&self) -> String {
        format!("{}/{}", self.server, self.name)
    }
}

/// A retrieval result: the document plus its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub tool: ToolDocument,
    pub score: f64,
}
