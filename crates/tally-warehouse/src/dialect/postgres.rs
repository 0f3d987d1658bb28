//! PostgreSQL dialect (also used by Redshift-style engines).

use chrono::{DateTime, Utc};

use super::{timestamp_text, SqlDialect};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn timestamp_literal(&self, ts: DateTime<Utc>) -> String {
        format!("TIMESTAMP '{}'", timestamp_text(ts))
    }

    fn add_hours(&self, expr: &str, hours: i64) -> String {
        if hours == 0 {
            return expr.to_string();
        }
        format!("{expr} + INTERVAL '{hours} hours'")
    }

    fn date_trunc_day(&self, expr: &str) -> String {
        format!("date_trunc('day', {expr})")
    }

    fn format_date(&self, expr: &str) -> String {
        format!("to_char({expr}, 'YYYY-MM-DD')")
    }

    fn format_datetime(&self, expr: &str) -> String {
        format!("to_char({expr}, 'YYYY-MM-DD HH24:MI:SS')")
    }

    fn cast_to_string(&self, expr: &str) -> String {
        format!("CAST({expr} AS VARCHAR)")
    }

    fn ensure_float(&self, expr: &str) -> String {
        format!("CAST({expr} AS DOUBLE PRECISION)")
    }

    fn percentile(&self, expr: &str, q: f64) -> String {
        format!("PERCENTILE_CONT({q}) WITHIN GROUP (ORDER BY {expr})")
    }

    fn string_type(&self) -> &'static str {
        "VARCHAR"
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    fn float_type(&self) -> &'static str {
        "DOUBLE PRECISION"
    }
}
