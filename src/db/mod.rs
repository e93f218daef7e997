// src/db/mod.rs
// Embedded usage store: rusqlite behind a mutex, no-op when unavailable

pub mod retention;
pub mod schema;
pub mod usage;

pub use retention::DEFAULT_RETENTION_DAYS;
pub use usage::{SearchRecord, UsageEvent};

use anyhow::Result as AnyResult;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Directory and file of the store under the home directory.
const STORE_DIR_NAME: &str = ".tool-hub-mcp";
const STORE_FILE_NAME: &str = "history.db";

/// The usage store.
///
/// When opening or migrating fails the store runs disabled: every
/// operation becomes a no-op returning a neutral value, and the gateway
/// keeps serving. A single internal mutex serializes all access.
pub struct Database {
    conn: Option<Mutex<Connection>>,
}

impl Database {
    /// Path of the store: `~/.tool-hub-mcp/history.db`.
    pub fn store_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STORE_DIR_NAME)
            .join(STORE_FILE_NAME)
    }

    /// Open the store at `path`, creating it if needed. Never fails:
    /// failures produce a disabled store.
    pub fn open(path: &Path) -> Self {
        match Self::try_open(path) {
            Ok(conn) => Self {
                conn: Some(Mutex::new(conn)),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "usage store disabled");
                Self::disabled()
            }
        }
    }

    fn try_open(path: &Path) -> AnyResult<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                let mut perms = std::fs::metadata(parent)?.permissions();
                perms.set_mode(0o700);
                std::fs::set_permissions(parent, perms)?;
            }
        }

        let conn = Connection::open(path)?;

        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(conn)
    }

    /// In-memory store (for testing).
    pub fn open_in_memory() -> Self {
        match Connection::open_in_memory()
            .map_err(anyhow::Error::from)
            .and_then(|conn| {
                schema::run_migrations(&conn)?;
                Ok(conn)
            }) {
            Ok(conn) => Self {
                conn: Some(Mutex::new(conn)),
            },
            Err(e) => {
                warn!(error = %e, "in-memory store unavailable");
                Self::disabled()
            }
        }
    }

    /// A store that accepts everything and records nothing.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Run `op` against the connection, or return `neutral` when the store
    /// is disabled or the operation fails. Failures are logged, never
    /// propagated.
    fn with_conn<T>(&self, neutral: T, op: impl FnOnce(&Connection) -> AnyResult<T>) -> T {
        let Some(conn) = &self.conn else {
            return neutral;
        };
        let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
        match op(&guard) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "usage store operation failed");
                neutral
            }
        }
    }

    pub fn record_usage(&self, event: &UsageEvent) {
        self.with_conn((), |conn| {
            usage::insert_usage_sync(conn, event)?;
            Ok(())
        })
    }

    pub fn record_search(&self, record: &SearchRecord) {
        self.with_conn((), |conn| {
            usage::insert_search_sync(conn, record)?;
            Ok(())
        })
    }

    /// Events for one tool with timestamps inside `[since, now]`.
    pub fn events_for_tool_since(&self, tool_name: &str, since: i64) -> Vec<UsageEvent> {
        self.with_conn(Vec::new(), |conn| {
            usage::events_for_tool_since_sync(conn, tool_name, since)
        })
    }

    pub fn count_events_for_tool(&self, tool_name: &str) -> u64 {
        self.with_conn(0, |conn| usage::count_for_tool_sync(conn, tool_name))
    }

    pub fn recent_events(&self, limit: usize) -> Vec<UsageEvent> {
        self.with_conn(Vec::new(), |conn| usage::recent_events_sync(conn, limit))
    }

    pub fn count_search_records(&self) -> u64 {
        self.with_conn(0, usage::count_search_records_sync)
    }

    pub fn recent_search_records(&self, limit: usize) -> Vec<SearchRecord> {
        self.with_conn(Vec::new(), |conn| {
            usage::recent_search_records_sync(conn, limit)
        })
    }

    pub fn store_embedding(&self, tool_name: &str, vector_blob: &[u8], version: i64) {
        self.with_conn((), |conn| {
            usage::store_embedding_sync(conn, tool_name, vector_blob, version)
        })
    }

    pub fn get_embedding(&self, tool_name: &str) -> Option<Vec<u8>> {
        self.with_conn(None, |conn| usage::get_embedding_sync(conn, tool_name))
    }

    /// Retention sweep: delete rows older than `days`, reclaim space.
    pub fn sweep_older_than(&self, days: u32) -> usize {
        self.with_conn(0, |conn| retention::sweep_older_than_sync(conn, days))
    }

    /// Dry-run of the sweep: per-table candidate counts.
    pub fn count_sweep_candidates(&self, days: u32) -> Vec<(String, usize)> {
        self.with_conn(Vec::new(), |conn| {
            retention::count_sweep_candidates_sync(conn, days)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        let db = Database::open(&path);
        assert!(db.is_enabled());
        db.record_usage(&UsageEvent::executed("jira/create_issue", "hash", None));
        drop(db);

        // Reopen: migrations are one-shot, data survives.
        let db = Database::open(&path);
        assert_eq!(db.count_events_for_tool("jira/create_issue"), 1);
    }

    #[test]
    fn test_disabled_store_is_neutral() {
        let db = Database::disabled();
        assert!(!db.is_enabled());

        db.record_usage(&UsageEvent::executed("t", "h", None));
        db.record_search(&SearchRecord {
            session_id: "s".to_string(),
            query_hash: "q".to_string(),
            timestamp: 0,
            results_count: 0,
        });

        assert!(db.events_for_tool_since("t", 0).is_empty());
        assert_eq!(db.count_events_for_tool("t"), 0);
        assert!(db.recent_events(10).is_empty());
        assert_eq!(db.sweep_older_than(30), 0);
        assert!(db.count_sweep_candidates(30).is_empty());
        assert_eq!(db.get_embedding("t"), None);
    }

    #[test]
    fn test_duplicate_search_session_fails_softly() {
        let db = Database::open_in_memory();
        let record = SearchRecord {
            session_id: "s-1".to_string(),
            query_hash: "q".to_string(),
            timestamp: 1,
            results_count: 2,
        };
        db.record_search(&record);
        // Unique violation is logged and dropped, not propagated.
        db.record_search(&record);
    }

    #[test]
    fn test_window_read_after_write() {
        let db = Database::open_in_memory();
        let now = chrono::Utc::now().timestamp();
        db.record_usage(&UsageEvent::executed("t", "h", None));

        let events = db.events_for_tool_since("t", now - 60);
        assert_eq!(events.len(), 1);
        assert!(events.iter().all(|e| e.timestamp >= now - 60));
    }
}
