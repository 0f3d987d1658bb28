//! SQLite dialect.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text, which sorts and
//! compares chronologically. Percentiles rely on the `tally_percentile`
//! aggregate registered by the embedded connector.

use chrono::{DateTime, Utc};

use super::{timestamp_text, SqlDialect};

/// Name of the percentile aggregate registered on every connection.
pub const PERCENTILE_FUNCTION: &str = "tally_percentile";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn timestamp_literal(&self, ts: DateTime<Utc>) -> String {
        format!("'{}'", timestamp_text(ts))
    }

    fn add_hours(&self, expr: &str, hours: i64) -> String {
        if hours == 0 {
            return expr.to_string();
        }
        format!("datetime({expr}, '{hours:+} hours')")
    }

    fn date_trunc_day(&self, expr: &str) -> String {
        format!("datetime({expr}, 'start of day')")
    }

    fn format_date(&self, expr: &str) -> String {
        format!("strftime('%Y-%m-%d', {expr})")
    }

    fn format_datetime(&self, expr: &str) -> String {
        format!("strftime('%Y-%m-%d %H:%M:%S', {expr})")
    }

    fn cast_to_string(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    fn ensure_float(&self, expr: &str) -> String {
        format!("CAST({expr} AS REAL)")
    }

    fn percentile(&self, expr: &str, q: f64) -> String {
        format!("{PERCENTILE_FUNCTION}({expr}, {q})")
    }

    fn string_type(&self) -> &'static str {
        "TEXT"
    }

    fn timestamp_type(&self) -> &'static str {
        "TEXT"
    }

    fn float_type(&self) -> &'static str {
        "REAL"
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }
}
