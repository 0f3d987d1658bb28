//! SQLite-backed [`ExperimentStore`].

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tally_core::errors::StorageError;

use super::connection::{self, now, serde_err, sqlite_err};
use super::{ExperimentStore, LedgerWrite};
use crate::experiment::ExperimentRecord;
use crate::ledger::NotificationLedger;

pub struct SqliteExperimentStore {
    conn: Mutex<Connection>,
}

impl SqliteExperimentStore {
    /// Open (or create) a store file and migrate it.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            conn: connection::open(Some(path))?,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: connection::open(None)?,
        })
    }
}

impl ExperimentStore for SqliteExperimentStore {
    fn get_experiment(&self, id: &str) -> Result<Option<ExperimentRecord>, StorageError> {
        let conn = connection::lock(&self.conn)?;
        let row = conn
            .query_row(
                "SELECT id, name, project, tags, archived, has_linked_changes,
                        past_notifications, version
                 FROM experiments WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(sqlite_err)?;

        let Some((id, name, project, tags, archived, has_linked_changes, past, version)) = row
        else {
            return Ok(None);
        };
        Ok(Some(ExperimentRecord {
            id,
            name,
            project,
            tags: serde_json::from_str(&tags).map_err(serde_err)?,
            archived,
            has_linked_changes,
            past_notifications: serde_json::from_str(&past).map_err(serde_err)?,
            version: version as u64,
        }))
    }

    fn put_experiment(&self, experiment: &ExperimentRecord) -> Result<(), StorageError> {
        let tags = serde_json::to_string(&experiment.tags).map_err(serde_err)?;
        let past = serde_json::to_string(&experiment.past_notifications).map_err(serde_err)?;
        let conn = connection::lock(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO experiments
                (id, name, project, tags, archived, has_linked_changes,
                 past_notifications, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                experiment.id,
                experiment.name,
                experiment.project,
                tags,
                experiment.archived,
                experiment.has_linked_changes,
                past,
                experiment.version as i64,
                now(),
            ],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    fn update_past_notifications(
        &self,
        id: &str,
        expected_version: u64,
        ledger: &NotificationLedger,
    ) -> Result<LedgerWrite, StorageError> {
        let past = serde_json::to_string(ledger).map_err(serde_err)?;
        let conn = connection::lock(&self.conn)?;
        let updated = conn
            .execute(
                "UPDATE experiments
                 SET past_notifications = ?1, version = version + 1, updated_at = ?2
                 WHERE id = ?3 AND version = ?4",
                params![past, now(), id, expected_version as i64],
            )
            .map_err(sqlite_err)?;
        if updated == 1 {
            return Ok(LedgerWrite::Written {
                version: expected_version + 1,
            });
        }

        let actual = conn
            .query_row(
                "SELECT version FROM experiments WHERE id = ?1",
                params![id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map_err(sqlite_err)?;
        Ok(LedgerWrite::Conflict {
            expected: expected_version,
            actual: actual.map(|v| v as u64),
        })
    }
}
