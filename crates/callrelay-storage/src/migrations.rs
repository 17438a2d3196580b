//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use callrelay_core::error::RelayError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RelayError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RelayError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RelayError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: pending_events");
    }

    Ok(())
}

/// Version 1: the pending event queue.
///
/// Timestamps are epoch nanoseconds; `last_attempt_at = 0` means the event
/// was never part of a failed consolidated attempt.
fn apply_v1(conn: &Connection) -> Result<(), RelayError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pending_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            kind            TEXT NOT NULL
                            CHECK (kind IN ('message', 'missed_call')),
            origin          TEXT NOT NULL,
            body            TEXT,
            occurred_at     INTEGER NOT NULL,
            line_label      TEXT NOT NULL DEFAULT '',
            line_id         INTEGER NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending')),
            last_attempt_at INTEGER NOT NULL DEFAULT 0,
            retry_count     INTEGER NOT NULL DEFAULT 0
                            CHECK (retry_count >= 0),
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_pending_events_status_occurred
            ON pending_events (status, occurred_at ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'pending_events');
        ",
    )
    .map_err(|e| RelayError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
