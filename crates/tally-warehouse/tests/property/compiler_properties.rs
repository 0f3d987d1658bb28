//! Property tests: compilation determinism, identifier validation, literal
//! escaping, percentile and quantile bounds, metric grouping.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use tally_core::errors::CompileError;
use tally_core::model::*;
use tally_warehouse::compiler::quantile::{nstar_for, quantile_bounds};
use tally_warehouse::compiler::SqlCompiler;
use tally_warehouse::connector::sqlite::percentile_cont;
use tally_warehouse::dialect::{BigQueryDialect, PostgresDialect, SqlDialect, SqliteDialect};
use tally_warehouse::pipeline::{group_metrics, pipeline_table_name};

fn params(experiment_id: &str, metrics: Vec<FactMetric>) -> ExperimentFactMetricsParams {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let settings = SnapshotSettings::new(
        experiment_id,
        ExposureQuery {
            id: "exposures".to_string(),
            user_id_type: "user_id".to_string(),
            sql: "SELECT * FROM exposures".to_string(),
            dimensions: vec![],
        },
        start,
        start + Duration::days(14),
        vec!["0".to_string(), "1".to_string()],
    );
    let orders = FactTable {
        id: "orders".to_string(),
        name: "Orders".to_string(),
        sql: "SELECT * FROM orders".to_string(),
        user_id_types: vec!["user_id".to_string()],
    };
    ExperimentFactMetricsParams {
        base: ExperimentBaseParams::new(settings, fact_table_map([orders])),
        metrics,
        units_table: None,
    }
}

fn metric_strategy() -> impl Strategy<Value = FactMetric> {
    (
        "[a-z]{1,8}",
        prop_oneof![Just(MetricKind::Mean), Just(MetricKind::Proportion)],
        -24i64..24,
        0u32..240,
        prop_oneof![
            Just(Capping::None),
            (1.0f64..1000.0).prop_map(|value| Capping::Absolute { value }),
            (0.5f64..0.99).prop_map(|percentile| Capping::Percentile {
                percentile,
                ignore_zeros: false
            }),
        ],
    )
        .prop_map(|(id, kind, delay, hours, capping)| {
            let mut metric = FactMetric::new(id.clone(), id, kind, ColumnRef::new("orders", "amount"));
            metric.window = MetricWindow::conversion(delay, hours);
            metric.capping = capping;
            metric
        })
}

fn dialects() -> [&'static dyn SqlDialect; 3] {
    [&PostgresDialect, &BigQueryDialect, &SqliteDialect]
}

proptest! {
    #[test]
    fn prop_compilation_is_deterministic(
        metrics in prop::collection::vec(metric_strategy(), 1..5)
    ) {
        for dialect in dialects() {
            let compiler = SqlCompiler::new(dialect);
            let p = params("exp", metrics.clone());
            let first = compiler.experiment_fact_metrics(&p).unwrap();
            let second = compiler.experiment_fact_metrics(&p.clone()).unwrap();
            prop_assert_eq!(first, second);
        }
    }

    #[test]
    fn prop_string_values_are_escaped(experiment_id in "[a-z' ]{1,20}") {
        let compiler = SqlCompiler::new(&PostgresDialect);
        let metric = FactMetric::new("m", "m", MetricKind::Mean, ColumnRef::new("orders", "amount"));
        let sql = compiler
            .experiment_fact_metrics(&params(&experiment_id, vec![metric]))
            .unwrap();
        let literal = format!("'{}'", experiment_id.replace('\'', "''"));
        let expected = format!("e.experiment_id = {}", literal);
        prop_assert!(sql.contains(&expected));
    }

    #[test]
    fn prop_invalid_columns_are_rejected(column in "[a-z]{1,5}[ ;()'-][a-z ]{0,5}") {
        let compiler = SqlCompiler::new(&SqliteDialect);
        let metric = FactMetric::new("m", "m", MetricKind::Mean, ColumnRef::new("orders", column.clone()));
        let err = compiler.experiment_fact_metrics(&params("exp", vec![metric])).unwrap_err();
        prop_assert_eq!(err, CompileError::InvalidIdentifier(column));
    }

    #[test]
    fn prop_percentile_stays_within_sample(
        mut values in prop::collection::vec(-1e6f64..1e6, 1..50),
        q in 0.0f64..=1.0
    ) {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let p = percentile_cont(&mut values, q).unwrap();
        prop_assert!(p >= min - 1e-6 && p <= max + 1e-6);
        let higher = percentile_cont(&mut values, (q + 0.1).min(1.0)).unwrap();
        prop_assert!(higher >= p - 1e-6);
    }

    #[test]
    fn prop_quantile_bounds_bracket_target(q in 0.01f64..0.99, n in 0u64..10_000_000) {
        let nstar = nstar_for(n);
        prop_assert!(nstar <= n.max(100));
        let (lower, upper) = quantile_bounds(q, nstar);
        prop_assert!((0.0..=q).contains(&lower));
        prop_assert!((q..=1.0).contains(&upper));
    }

    #[test]
    fn prop_grouping_keeps_every_metric(
        tables in prop::collection::vec(0usize..3, 0..30),
        max in 1usize..6
    ) {
        let metrics: Vec<FactMetric> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| {
                FactMetric::new(format!("m{i}"), "m", MetricKind::Mean, ColumnRef::count(format!("t{t}")))
            })
            .collect();
        let groups = group_metrics(&metrics, max);
        prop_assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), metrics.len());
        for group in &groups {
            prop_assert!(!group.is_empty() && group.len() <= max);
            prop_assert!(group.iter().all(|m| m.fact_table_id() == group[0].fact_table_id()));
        }
    }

    #[test]
    fn prop_table_names_are_identifiers(
        prefix in "[a-z_]{1,10}",
        experiment in "\\PC{0,40}",
        snapshot in "\\PC{0,40}"
    ) {
        let name = pipeline_table_name(&prefix, &experiment, &snapshot);
        prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        prop_assert!(name.len() <= 10 + 24 + 24 + 16 + 3);
    }
}
