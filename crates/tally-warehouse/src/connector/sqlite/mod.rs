//! Embedded SQLite warehouse.
//!
//! One serialized connection. Timestamps are stored as
//! `YYYY-MM-DD HH:MM:SS` text. Jobs run when waited on; cancellation
//! interrupts the running statement.

pub mod functions;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, InterruptHandle};
use serde_json::Value;
use tally_core::errors::WarehouseError;
use tally_core::model::{ColumnTopValuesParams, TestQueryParams};
use tally_core::traits::Cancellable;

use super::capabilities::{
    QueryCanceller, SchemaInspector, TableInfo, TestQueryRunner, TopValuesProvider,
};
use super::job::{
    JobHandle, JobObserver, JsonRow, QueryJob, QueryResponse, QueryStatistics, RawQueryResult,
};
use super::rows::{decode_rows, TopValueRow};
use super::WarehouseConnector;
use crate::dialect::{SqlDialect, SqliteDialect};

pub use functions::percentile_cont;

pub struct SqliteConnector {
    conn: Mutex<Connection>,
    interrupt: Arc<InterruptHandle>,
    active_job: Arc<Mutex<Option<String>>>,
    path: Option<PathBuf>,
    dialect: SqliteDialect,
}

impl SqliteConnector {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, WarehouseError> {
        let conn = Connection::open(path).map_err(query_error)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let conn = Connection::open_in_memory().map_err(query_error)?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, WarehouseError> {
        conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA temp_store = MEMORY;")
            .map_err(query_error)?;
        functions::register(&conn).map_err(query_error)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Mutex::new(conn),
            interrupt,
            active_job: Arc::new(Mutex::new(None)),
            path,
            dialect: SqliteDialect,
        })
    }

    /// Database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run statements directly, outside the job machinery. Used to seed
    /// data.
    pub fn execute_batch(&self, sql: &str) -> Result<(), WarehouseError> {
        self.with_conn(|conn| conn.execute_batch(sql).map_err(query_error))
    }

    /// Execute an operation with the serialized connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, WarehouseError>
    where
        F: FnOnce(&Connection) -> Result<T, WarehouseError>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| WarehouseError::query_failed("connection lock poisoned"))?;
        f(&guard)
    }

    fn execute(&self, cancel: &SqliteCancel, sql: &str) -> Result<RawQueryResult, WarehouseError> {
        let job_id = cancel.job_id.as_str();
        self.with_conn(|conn| {
            self.set_active(Some(job_id))?;
            if cancel.is_cancelled() {
                self.set_active(None)?;
                return Err(WarehouseError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }
            let started = Instant::now();
            let result = run_statement(conn, sql);
            self.set_active(None)?;
            let rows = result.map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::OperationInterrupted) => WarehouseError::Cancelled {
                    job_id: job_id.to_string(),
                },
                _ => query_error(e),
            })?;
            let statistics = QueryStatistics {
                job_id: job_id.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                rows_returned: rows.len(),
                bytes_processed: None,
            };
            tracing::debug!(
                job_id,
                duration_ms = statistics.duration_ms,
                rows = statistics.rows_returned,
                "sqlite job finished"
            );
            Ok(RawQueryResult {
                rows,
                statistics: Some(statistics),
            })
        })
    }

    fn set_active(&self, job_id: Option<&str>) -> Result<(), WarehouseError> {
        let mut active = self
            .active_job
            .lock()
            .map_err(|_| WarehouseError::query_failed("job registry lock poisoned"))?;
        *active = job_id.map(str::to_string);
        Ok(())
    }
}

impl WarehouseConnector for SqliteConnector {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn submit(&self, sql: &str) -> Result<Box<dyn QueryJob + '_>, WarehouseError> {
        let cancel = Arc::new(SqliteCancel {
            job_id: uuid::Uuid::new_v4().to_string(),
            requested: AtomicBool::new(false),
            interrupt: Arc::clone(&self.interrupt),
            active_job: Arc::clone(&self.active_job),
        });
        Ok(Box::new(SqliteJob {
            connector: self,
            sql: sql.to_string(),
            cancel,
        }))
    }

    fn schema_inspector(&self) -> Option<&dyn SchemaInspector> {
        Some(self)
    }

    fn top_values(&self) -> Option<&dyn TopValuesProvider> {
        Some(self)
    }

    fn test_query_runner(&self) -> Option<&dyn TestQueryRunner> {
        Some(self)
    }

    fn canceller(&self) -> Option<&dyn QueryCanceller> {
        Some(self)
    }
}

impl SchemaInspector for SqliteConnector {
    fn list_tables(&self) -> Result<Vec<TableInfo>, WarehouseError> {
        self.with_conn(|conn| schema::list_tables(conn).map_err(query_error))
    }
}

impl TopValuesProvider for SqliteConnector {
    fn column_top_values(
        &self,
        params: &ColumnTopValuesParams,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<TopValueRow>, WarehouseError> {
        let sql = self.compiler().column_top_values(params)?;
        decode_rows("column top values", self.run_query(&sql, observer)?)
    }
}

impl TestQueryRunner for SqliteConnector {
    fn run_test_query(
        &self,
        params: &TestQueryParams,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<JsonRow>, WarehouseError> {
        let sql = self.compiler().test_query(params)?;
        let raw = self.run_query(&sql, observer)?;
        Ok(QueryResponse {
            rows: raw.rows,
            statistics: raw.statistics,
        })
    }
}

impl QueryCanceller for SqliteConnector {
    fn cancel_query(&self, job_id: &str) -> Result<bool, WarehouseError> {
        let active = self
            .active_job
            .lock()
            .map_err(|_| WarehouseError::query_failed("job registry lock poisoned"))?;
        if active.as_deref() == Some(job_id) {
            self.interrupt.interrupt();
            return Ok(true);
        }
        Ok(false)
    }
}

struct SqliteCancel {
    job_id: String,
    requested: AtomicBool,
    interrupt: Arc<InterruptHandle>,
    active_job: Arc<Mutex<Option<String>>>,
}

impl Cancellable for SqliteCancel {
    fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.requested.store(true, Ordering::Release);
        if let Ok(active) = self.active_job.lock() {
            if active.as_deref() == Some(self.job_id.as_str()) {
                self.interrupt.interrupt();
            }
        }
    }
}

struct SqliteJob<'a> {
    connector: &'a SqliteConnector,
    sql: String,
    cancel: Arc<SqliteCancel>,
}

impl QueryJob for SqliteJob<'_> {
    fn handle(&self) -> JobHandle {
        JobHandle::new(self.cancel.job_id.clone(), self.cancel.clone())
    }

    fn wait(self: Box<Self>) -> Result<RawQueryResult, WarehouseError> {
        self.connector.execute(&self.cancel, &self.sql)
    }
}

/// Queries return their rows. Anything without result columns (DDL, DML,
/// multi-statement scripts) runs as a batch and returns none.
fn run_statement(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<JsonRow>> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(rusqlite::Error::MultipleStatement) => {
            conn.execute_batch(sql)?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    if stmt.column_count() == 0 {
        drop(stmt);
        conn.execute_batch(sql)?;
        return Ok(Vec::new());
    }
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = JsonRow::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), json_value(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn query_error(e: rusqlite::Error) -> WarehouseError {
    WarehouseError::query_failed(e.to_string())
}
