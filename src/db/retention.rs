// src/db/retention.rs
// Horizon sweep over the append-only event log

use anyhow::Result;
use rusqlite::Connection;

/// Default retention horizon in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Batch size per DELETE so the write lock is never held over a huge
/// backlog.
const DELETE_BATCH: usize = 10_000;

const SWEPT_TABLES: [&str; 2] = ["tool_usage", "search_history"];

/// Delete events older than `days` and reclaim space. Returns rows deleted.
pub fn sweep_older_than_sync(conn: &Connection, days: u32) -> Result<usize> {
    let cutoff = chrono::Utc::now().timestamp() - i64::from(days) * 86_400;
    let mut total = 0usize;

    for table in SWEPT_TABLES {
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN \
             (SELECT rowid FROM {table} WHERE timestamp < ?1 LIMIT {DELETE_BATCH})"
        );
        loop {
            let deleted = conn.execute(&sql, [cutoff])?;
            total += deleted;
            if deleted < DELETE_BATCH {
                break;
            }
        }
    }

    if total > 0 {
        tracing::info!(deleted = total, days, "retention sweep complete");
        if let Err(e) = conn.execute_batch("VACUUM") {
            tracing::warn!(error = %e, "vacuum after retention sweep failed");
        }
    }

    Ok(total)
}

/// Dry-run: rows each swept table would lose at the given horizon.
pub fn count_sweep_candidates_sync(conn: &Connection, days: u32) -> Result<Vec<(String, usize)>> {
    let cutoff = chrono::Utc::now().timestamp() - i64::from(days) * 86_400;
    let mut out = Vec::new();
    for table in SWEPT_TABLES {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE timestamp < ?1"),
            [cutoff],
            |row| row.get(0),
        )?;
        out.push((table.to_string(), count as usize));
    }
    Ok(out)
}
