//! SQLite-backed [`EventSink`]: an append-only log of alert events.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use tally_core::errors::{NotificationError, StorageError};
use tally_core::events::{AlertEvent, EventSink};

use super::connection::{self, now, serde_err, sqlite_err};

/// A logged event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub created_at: String,
    pub event: AlertEvent,
}

pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    /// Open (or create) a log file and migrate it.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            conn: connection::open(Some(path))?,
        })
    }

    /// Open an in-memory log (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: connection::open(None)?,
        })
    }

    /// Append `event` and return its id.
    pub fn append(&self, event: &AlertEvent) -> Result<String, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload = serde_json::to_string(event).map_err(serde_err)?;
        let conn = connection::lock(&self.conn)?;
        conn.execute(
            "INSERT INTO events
                (id, event, object, notification_type, experiment_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                event.event,
                event.object,
                event.notification_type().as_str(),
                event.data.experiment_id(),
                payload,
                now(),
            ],
        )
        .map_err(sqlite_err)?;
        Ok(id)
    }

    /// Events of one experiment, oldest first.
    pub fn events_for_experiment(&self, experiment_id: &str) -> Result<Vec<StoredEvent>, StorageError> {
        let conn = connection::lock(&self.conn)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, created_at, payload FROM events
                 WHERE experiment_id = ?1
                 ORDER BY rowid",
            )
            .map_err(sqlite_err)?;
        let rows = stmt
            .query_map(params![experiment_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(sqlite_err)?;

        let mut result = Vec::new();
        for row in rows {
            let (id, created_at, payload) = row.map_err(sqlite_err)?;
            result.push(StoredEvent {
                id,
                created_at,
                event: serde_json::from_str(&payload).map_err(serde_err)?,
            });
        }
        Ok(result)
    }

    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = connection::lock(&self.conn)?;
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(sqlite_err)
    }
}

impl EventSink for SqliteEventLog {
    fn create_event(&self, event: &AlertEvent) -> Result<Option<String>, NotificationError> {
        Ok(Some(self.append(event)?))
    }
}
