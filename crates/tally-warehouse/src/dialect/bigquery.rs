//! BigQuery standard SQL dialect.

use chrono::{DateTime, Utc};

use super::{timestamp_text, SqlDialect};

/// Resolution of `APPROX_QUANTILES` used for percentiles.
const QUANTILE_BUCKETS: u32 = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct BigQueryDialect;

impl SqlDialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn timestamp_literal(&self, ts: DateTime<Utc>) -> String {
        format!("TIMESTAMP '{}'", timestamp_text(ts))
    }

    fn add_hours(&self, expr: &str, hours: i64) -> String {
        if hours == 0 {
            return expr.to_string();
        }
        format!("TIMESTAMP_ADD({expr}, INTERVAL {hours} HOUR)")
    }

    fn date_trunc_day(&self, expr: &str) -> String {
        format!("TIMESTAMP_TRUNC({expr}, DAY)")
    }

    fn format_date(&self, expr: &str) -> String {
        format!("FORMAT_TIMESTAMP('%Y-%m-%d', {expr})")
    }

    fn format_datetime(&self, expr: &str) -> String {
        format!("FORMAT_TIMESTAMP('%Y-%m-%d %H:%M:%S', {expr})")
    }

    fn cast_to_string(&self, expr: &str) -> String {
        format!("CAST({expr} AS STRING)")
    }

    fn ensure_float(&self, expr: &str) -> String {
        format!("CAST({expr} AS FLOAT64)")
    }

    fn percentile(&self, expr: &str, q: f64) -> String {
        let offset = (q.clamp(0.0, 1.0) * f64::from(QUANTILE_BUCKETS)).round() as u32;
        format!("APPROX_QUANTILES({expr}, {QUANTILE_BUCKETS} IGNORE NULLS)[OFFSET({offset})]")
    }

    fn string_type(&self) -> &'static str {
        "STRING"
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    fn float_type(&self) -> &'static str {
        "FLOAT64"
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}
