//! Durable queue of events that have not been delivered yet.
//!
//! Every row in `pending_events` has status `pending`; delivered events are
//! deleted rather than marked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Row;

use callrelay_core::error::RelayError;
use callrelay_core::types::{
    datetime_from_nanos, datetime_to_nanos, Event, EventKind, EventStatus,
};

use crate::db::Database;

const SELECT_COLUMNS: &str = "SELECT id, kind, origin, body, occurred_at, line_label, line_id,
        last_attempt_at, retry_count
     FROM pending_events";

/// Repository for the `pending_events` table.
#[derive(Clone)]
pub struct EventQueue {
    db: Arc<Database>,
}

impl EventQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an event as pending and return the id assigned to it.
    ///
    /// Any `id`, `status`, `last_attempt_at` or `retry_count` already set on
    /// the input is ignored; a queued event always starts fresh.
    pub fn insert(&self, event: &Event) -> Result<i64, RelayError> {
        let occurred_at = stored_time(&event.occurred_at)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_events
                    (kind, origin, body, occurred_at, line_label, line_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    event.kind.as_str(),
                    event.origin,
                    event.body,
                    occurred_at,
                    event.line_label,
                    event.line_id,
                    EventStatus::Pending.as_str(),
                ],
            )
            .map_err(|e| RelayError::Storage(format!("Failed to insert event: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All pending events, earliest occurrence first.
    ///
    /// Ties on `occurred_at` fall back to insertion order.
    pub fn list_pending(&self) -> Result<Vec<Event>, RelayError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{} WHERE status = ?1 ORDER BY occurred_at ASC, id ASC",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![EventStatus::Pending.as_str()], |row| {
                    Ok(row_to_event(row))
                })
                .map_err(|e| RelayError::Storage(e.to_string()))?;

            let mut events = Vec::new();
            for row in rows {
                let event = row.map_err(|e| RelayError::Storage(e.to_string()))??;
                events.push(event);
            }
            Ok(events)
        })
    }

    /// Remove the given events. Ids that are not present are ignored.
    ///
    /// Returns the number of rows actually deleted.
    pub fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, RelayError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RelayError::Storage(format!("Failed to begin transaction: {}", e)))?;
            let mut deleted = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM pending_events WHERE id = ?1")
                    .map_err(|e| RelayError::Storage(e.to_string()))?;
                for id in ids {
                    deleted += stmt
                        .execute(rusqlite::params![id])
                        .map_err(|e| RelayError::Storage(format!("Failed to delete event: {}", e)))?;
                }
            }
            tx.commit()
                .map_err(|e| RelayError::Storage(format!("Failed to commit delete: {}", e)))?;
            Ok(deleted)
        })
    }

    /// Record one failed delivery attempt for every id, in a single transaction.
    ///
    /// Sets `last_attempt_at` and increments `retry_count` by exactly one.
    pub fn mark_attempt(&self, ids: &[i64], attempted_at: DateTime<Utc>) -> Result<usize, RelayError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let attempted_at = stored_time(&attempted_at)?;
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| RelayError::Storage(format!("Failed to begin transaction: {}", e)))?;
            let mut updated = 0;
            {
                let mut stmt = tx
                    .prepare(
                        "UPDATE pending_events
                         SET last_attempt_at = ?1, retry_count = retry_count + 1
                         WHERE id = ?2",
                    )
                    .map_err(|e| RelayError::Storage(e.to_string()))?;
                for id in ids {
                    updated += stmt
                        .execute(rusqlite::params![attempted_at, id])
                        .map_err(|e| {
                            RelayError::Storage(format!("Failed to mark attempt: {}", e))
                        })?;
                }
            }
            tx.commit()
                .map_err(|e| RelayError::Storage(format!("Failed to commit attempt: {}", e)))?;
            Ok(updated)
        })
    }

    /// Number of events waiting for delivery.
    pub fn pending_count(&self) -> Result<u64, RelayError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM pending_events WHERE status = ?1",
                    rusqlite::params![EventStatus::Pending.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| RelayError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue").finish()
    }
}

fn stored_time(at: &DateTime<Utc>) -> Result<i64, RelayError> {
    datetime_to_nanos(at)
        .ok_or_else(|| RelayError::Storage(format!("Timestamp out of storable range: {}", at)))
}

/// Map a `pending_events` row onto an [`Event`].
fn row_to_event(row: &Row) -> Result<Event, RelayError> {
    let id: i64 = row.get(0).map_err(|e| RelayError::Storage(e.to_string()))?;
    let kind_str: String = row.get(1).map_err(|e| RelayError::Storage(e.to_string()))?;
    let origin: String = row.get(2).map_err(|e| RelayError::Storage(e.to_string()))?;
    let body: Option<String> = row.get(3).map_err(|e| RelayError::Storage(e.to_string()))?;
    let occurred_ns: i64 = row.get(4).map_err(|e| RelayError::Storage(e.to_string()))?;
    let line_label: String = row.get(5).map_err(|e| RelayError::Storage(e.to_string()))?;
    let line_id: i64 = row.get(6).map_err(|e| RelayError::Storage(e.to_string()))?;
    let attempt_ns: i64 = row.get(7).map_err(|e| RelayError::Storage(e.to_string()))?;
    let retry_count: i64 = row.get(8).map_err(|e| RelayError::Storage(e.to_string()))?;

    let kind = EventKind::parse(&kind_str)
        .ok_or_else(|| RelayError::Storage(format!("Unknown event kind: {}", kind_str)))?;
    let occurred_at = datetime_from_nanos(occurred_ns);
    let last_attempt_at = (attempt_ns != 0).then(|| datetime_from_nanos(attempt_ns));

    Ok(Event {
        id: Some(id),
        kind,
        origin,
        body,
        occurred_at,
        line_label,
        line_id,
        status: EventStatus::Pending,
        last_attempt_at,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
    })
}
