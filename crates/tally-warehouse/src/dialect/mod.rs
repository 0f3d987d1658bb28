//! SQL dialects.
//!
//! A dialect renders the handful of engine-specific fragments the compiler
//! needs: timestamp literals, date arithmetic, casts, percentiles and DDL
//! types. Everything else the compiler emits is portable SQL.

pub mod bigquery;
pub mod postgres;
pub mod sqlite;

use std::fmt;

use chrono::{DateTime, Utc};

pub use bigquery::BigQueryDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Renders engine-specific SQL fragments. All methods are pure.
pub trait SqlDialect: Send + Sync + fmt::Debug {
    /// Stable dialect name (`postgresql`, `bigquery`, `sqlite`).
    fn name(&self) -> &'static str;

    /// Literal for a point in time, comparable to fact/exposure timestamps.
    fn timestamp_literal(&self, ts: DateTime<Utc>) -> String;

    /// `expr` shifted by `hours` (may be negative).
    fn add_hours(&self, expr: &str, hours: i64) -> String;

    /// `expr` truncated to the start of its day, still a timestamp.
    fn date_trunc_day(&self, expr: &str) -> String;

    /// `expr` rendered as a `YYYY-MM-DD` string.
    fn format_date(&self, expr: &str) -> String;

    /// `expr` rendered as a `YYYY-MM-DD HH:MM:SS` string.
    fn format_datetime(&self, expr: &str) -> String;

    fn cast_to_string(&self, expr: &str) -> String;

    fn ensure_float(&self, expr: &str) -> String;

    /// Aggregate: continuous percentile `q` of `expr`, ignoring NULLs.
    fn percentile(&self, expr: &str, q: f64) -> String;

    fn string_type(&self) -> &'static str;

    fn timestamp_type(&self) -> &'static str;

    fn float_type(&self) -> &'static str;

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Single-quoted string literal.
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// `YYYY-MM-DD` literal compared against `format_date` output.
    fn date_string_literal(&self, ts: DateTime<Utc>) -> String {
        self.string_literal(&ts.format("%Y-%m-%d").to_string())
    }

    fn create_table_as(&self, table: &str, select: &str) -> String {
        format!("CREATE TABLE {table} AS\n{select}")
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table}")
    }

    fn select_limit(&self, select: &str, limit: usize) -> String {
        format!("{select}\nLIMIT {limit}")
    }
}

/// Look up a dialect by name. Accepts a few common aliases.
pub fn dialect_for_name(name: &str) -> Option<Box<dyn SqlDialect>> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Some(Box::new(PostgresDialect)),
        "bigquery" => Some(Box::new(BigQueryDialect)),
        "sqlite" => Some(Box::new(SqliteDialect)),
        _ => None,
    }
}

pub(crate) fn timestamp_text(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
