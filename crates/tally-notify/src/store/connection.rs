//! Connection setup shared by the stores.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tally_core::errors::StorageError;

use crate::migrations;

pub(crate) fn open(path: Option<&Path>) -> Result<Mutex<Connection>, StorageError> {
    let conn = match path {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    }
    .map_err(sqlite_err)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .map_err(|e| StorageError::SqliteError {
        message: format!("failed to apply pragmas: {e}"),
    })?;
    migrations::run_migrations(&conn)?;
    Ok(Mutex::new(conn))
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock().map_err(|_| StorageError::SqliteError {
        message: "connection lock poisoned".to_string(),
    })
}

pub(crate) fn sqlite_err(e: rusqlite::Error) -> StorageError {
    StorageError::SqliteError {
        message: e.to_string(),
    }
}

pub(crate) fn serde_err(e: serde_json::Error) -> StorageError {
    StorageError::Serialization {
        message: e.to_string(),
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
