// src/db/schema.rs
// Versioned schema migrations for the usage store

use anyhow::Result;
use rusqlite::{params, Connection};

/// One irreversible schema step. Migrations run at most once, in version
/// order, and are recorded in `schema_migrations`.
struct Migration {
    version: i64,
    name: &'static str,
    up: fn(&Connection) -> rusqlite::Result<()>,
}

fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "initial_tables",
            up: migrate_initial_tables,
        },
        Migration {
            version: 2,
            name: "tool_usage_session_id",
            up: migrate_tool_usage_session_id,
        },
    ]
}

/// Apply every migration with a version greater than the recorded maximum.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in migrations().iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applying store migration"
        );
        (migration.up)(conn)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
    }

    Ok(())
}

fn migrate_initial_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE tool_usage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_name TEXT NOT NULL,
            context_hash TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            selected INTEGER NOT NULL DEFAULT 0,
            rating INTEGER NOT NULL DEFAULT 0,
            was_recommended INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX idx_tool_usage_tool ON tool_usage(tool_name);
        CREATE INDEX idx_tool_usage_context ON tool_usage(context_hash);
        CREATE INDEX idx_tool_usage_time ON tool_usage(timestamp DESC);

        CREATE TABLE search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL UNIQUE,
            query_hash TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            results_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX idx_search_history_time ON search_history(timestamp DESC);

        CREATE TABLE tool_embeddings (
            tool_name TEXT PRIMARY KEY,
            vector_blob BLOB NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
}

/// Correlates an execution with the search session that surfaced the tool.
fn migrate_tool_usage_session_id(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("ALTER TABLE tool_usage ADD COLUMN session_id TEXT")
}
