//! Dialect rendering tests.

use chrono::{TimeZone, Utc};
use tally_warehouse::dialect::{
    dialect_for_name, BigQueryDialect, PostgresDialect, SqlDialect, SqliteDialect,
};

#[test]
fn test_dialect_lookup_accepts_aliases() {
    assert_eq!(dialect_for_name("postgres").unwrap().name(), "postgresql");
    assert_eq!(dialect_for_name("PostgreSQL").unwrap().name(), "postgresql");
    assert_eq!(dialect_for_name("bigquery").unwrap().name(), "bigquery");
    assert_eq!(dialect_for_name("SQLite").unwrap().name(), "sqlite");
    assert!(dialect_for_name("oracle").is_none());
}

#[test]
fn test_timestamp_literals() {
    let ts = Utc.with_ymd_and_hms(2024, 3, 5, 13, 4, 5).unwrap();
    assert_eq!(PostgresDialect.timestamp_literal(ts), "TIMESTAMP '2024-03-05 13:04:05'");
    assert_eq!(BigQueryDialect.timestamp_literal(ts), "TIMESTAMP '2024-03-05 13:04:05'");
    assert_eq!(SqliteDialect.timestamp_literal(ts), "'2024-03-05 13:04:05'");
    assert_eq!(SqliteDialect.date_string_literal(ts), "'2024-03-05'");
}

#[test]
fn test_add_hours_is_identity_for_zero() {
    for dialect in [
        &PostgresDialect as &dyn SqlDialect,
        &BigQueryDialect,
        &SqliteDialect,
    ] {
        assert_eq!(dialect.add_hours("x.ts", 0), "x.ts");
    }
}

#[test]
fn test_add_hours_renders_sign() {
    assert_eq!(SqliteDialect.add_hours("x.ts", 24), "datetime(x.ts, '+24 hours')");
    assert_eq!(SqliteDialect.add_hours("x.ts", -3), "datetime(x.ts, '-3 hours')");
    assert_eq!(PostgresDialect.add_hours("x.ts", -3), "x.ts + INTERVAL '-3 hours'");
    assert_eq!(
        BigQueryDialect.add_hours("x.ts", 72),
        "TIMESTAMP_ADD(x.ts, INTERVAL 72 HOUR)"
    );
}

#[test]
fn test_string_literals_escape_quotes() {
    assert_eq!(PostgresDialect.string_literal("it's"), "'it''s'");
    assert_eq!(SqliteDialect.string_literal("it's"), "'it''s'");
    assert_eq!(BigQueryDialect.string_literal("it's"), "'it\\'s'");
    assert_eq!(BigQueryDialect.string_literal("a\\b"), "'a\\\\b'");
}

#[test]
fn test_percentiles() {
    assert_eq!(
        PostgresDialect.percentile("m.value", 0.5),
        "PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY m.value)"
    );
    assert_eq!(SqliteDialect.percentile("m.value", 0.9), "tally_percentile(m.value, 0.9)");
    assert_eq!(
        BigQueryDialect.percentile("m.value", 0.95),
        "APPROX_QUANTILES(m.value, 1000 IGNORE NULLS)[OFFSET(950)]"
    );
}

#[test]
fn test_bool_literals() {
    assert_eq!(PostgresDialect.bool_literal(true), "TRUE");
    assert_eq!(SqliteDialect.bool_literal(true), "1");
    assert_eq!(SqliteDialect.bool_literal(false), "0");
}

#[test]
fn test_ddl_helpers() {
    let select = "SELECT 1";
    assert_eq!(
        SqliteDialect.create_table_as("units", select),
        "CREATE TABLE units AS\nSELECT 1"
    );
    assert_eq!(PostgresDialect.drop_table("a.b"), "DROP TABLE IF EXISTS a.b");
    assert_eq!(SqliteDialect.select_limit(select, 3), "SELECT 1\nLIMIT 3");
}
