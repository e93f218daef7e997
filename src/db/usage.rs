// src/db/usage.rs
// Usage-event and search-record rows: inserts and window queries

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// One tool-execution or feedback event. Append-only; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub tool_name: String,
    /// SHA-256 hex digest of the invocation context, never the plaintext.
    pub context_hash: String,
    /// Unix seconds, UTC.
    pub timestamp: i64,
    /// Was the tool actually invoked, or merely shown.
    pub selected: bool,
    /// 0 = unrated, 1..=5 user rating.
    pub rating: u8,
    /// Did the ranking layer surface this tool.
    pub was_recommended: bool,
    /// Search session that led to this execution, when known.
    pub session_id: Option<String>,
}

impl UsageEvent {
    pub fn executed(tool_name: &str, context_hash: &str, session_id: Option<String>) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            context_hash: context_hash.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            selected: true,
            rating: 0,
            was_recommended: false,
            session_id,
        }
    }
}

/// One `hub_search` invocation. Append-only; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub session_id: String,
    /// SHA-256 hex digest of the query, never the plaintext.
    pub query_hash: String,
    /// Unix seconds, UTC.
    pub timestamp: i64,
    pub results_count: u32,
}

pub fn insert_usage_sync(conn: &Connection, event: &UsageEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO tool_usage (
            tool_name, context_hash, timestamp, selected, rating, was_recommended, session_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.tool_name,
            event.context_hash,
            event.timestamp,
            event.selected as i64,
            event.rating as i64,
            event.was_recommended as i64,
            event.session_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_search_sync(conn: &Connection, record: &SearchRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO search_history (session_id, query_hash, timestamp, results_count)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.session_id,
            record.query_hash,
            record.timestamp,
            record.results_count as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageEvent> {
    Ok(UsageEvent {
        tool_name: row.get(0)?,
        context_hash: row.get(1)?,
        timestamp: row.get(2)?,
        selected: row.get::<_, i64>(3)? != 0,
        rating: row.get::<_, i64>(4)? as u8,
        was_recommended: row.get::<_, i64>(5)? != 0,
        session_id: row.get(6)?,
    })
}

const EVENT_COLUMNS: &str =
    "tool_name, context_hash, timestamp, selected, rating, was_recommended, session_id";

/// Events for one tool with `timestamp >= since`, newest first.
pub fn events_for_tool_since_sync(
    conn: &Connection,
    tool_name: &str,
    since: i64,
) -> Result<Vec<UsageEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM tool_usage
         WHERE tool_name = ?1 AND timestamp >= ?2
         ORDER BY timestamp DESC"
    ))?;
    let rows = stmt.query_map(params![tool_name, since], event_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn count_for_tool_sync(conn: &Connection, tool_name: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tool_usage WHERE tool_name = ?1",
        params![tool_name],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Most recent events across all tools, newest first.
pub fn recent_events_sync(conn: &Connection, limit: usize) -> Result<Vec<UsageEvent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM tool_usage ORDER BY timestamp DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit as i64], event_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn count_search_records_sync(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM search_history", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Most recent search records, newest first.
pub fn recent_search_records_sync(conn: &Connection, limit: usize) -> Result<Vec<SearchRecord>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, query_hash, timestamp, results_count
         FROM search_history ORDER BY timestamp DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(SearchRecord {
            session_id: row.get(0)?,
            query_hash: row.get(1)?,
            timestamp: row.get(2)?,
            results_count: row.get::<_, i64>(3)? as u32,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn store_embedding_sync(
    conn: &Connection,
    tool_name: &str,
    vector_blob: &[u8],
    version: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO tool_embeddings (tool_name, vector_blob, version)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(tool_name) DO UPDATE SET vector_blob = ?2, version = ?3",
        params![tool_name, vector_blob, version],
    )?;
    Ok(())
}

pub fn get_embedding_sync(conn: &Connection, tool_name: &str) -> Result<Option<Vec<u8>>> {
    Ok(conn
        .query_row(
            "SELECT vector_blob FROM tool_embeddings WHERE tool_name = ?1",
            params![tool_name],
            |row| row.get(0),
        )
        .optional()?)
}
