use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};

use tally_core::model::*;
use tally_warehouse::compiler::SqlCompiler;
use tally_warehouse::dialect::{BigQueryDialect, PostgresDialect};

/// A snapshot with one experiment dimension and `n` capped, regression
/// adjusted metrics on one fact table.
fn build_params(n: usize) -> ExperimentFactMetricsParams {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut settings = SnapshotSettings::new(
        "checkout",
        ExposureQuery {
            id: "exposures".to_string(),
            user_id_type: "user_id".to_string(),
            sql: "SELECT * FROM exposures".to_string(),
            dimensions: vec!["browser".to_string()],
        },
        start,
        start + Duration::days(30),
        vec!["0".to_string(), "1".to_string()],
    );
    settings.regression_adjustment_enabled = true;
    let orders = FactTable {
        id: "orders".to_string(),
        name: "Orders".to_string(),
        sql: "SELECT * FROM orders".to_string(),
        user_id_types: vec!["user_id".to_string()],
    };
    let metrics = (0..n)
        .map(|i| {
            let mut metric = FactMetric::new(
                format!("m{i}"),
                format!("Metric {i}"),
                MetricKind::Mean,
                ColumnRef::new("orders", "amount").with_filter(format!("f.items > {i}")),
            );
            metric.window = MetricWindow::conversion(0, 72);
            metric.capping = Capping::Percentile {
                percentile: 0.99,
                ignore_zeros: true,
            };
            metric.regression_adjustment = RegressionAdjustment {
                enabled: true,
                days: 14,
            };
            metric
        })
        .collect();
    ExperimentFactMetricsParams {
        base: ExperimentBaseParams::new(settings, fact_table_map([orders]))
            .with_dimension(Dimension::experiment("browser")),
        metrics,
        units_table: None,
    }
}

fn bench_fact_metrics_10(c: &mut Criterion) {
    let params = build_params(10);
    let compiler = SqlCompiler::new(&PostgresDialect);
    c.bench_function("fact_metrics_10_metrics", |b| {
        b.iter(|| compiler.experiment_fact_metrics(&params).unwrap());
    });
}

fn bench_fact_metrics_50(c: &mut Criterion) {
    let params = build_params(50);
    let compiler = SqlCompiler::new(&BigQueryDialect);
    c.bench_function("fact_metrics_50_metrics", |b| {
        b.iter(|| compiler.experiment_fact_metrics(&params).unwrap());
    });
}

fn bench_pipeline_statements(c: &mut Criterion) {
    let params = build_params(10);
    let units = PipelineUnitsParams {
        base: params.base,
        table_name: "tally_pipeline_checkout".to_string(),
        lookback_date: Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
    };
    let compiler = SqlCompiler::new(&PostgresDialect);
    c.bench_function("pipeline_fact_metrics_10_metrics", |b| {
        b.iter(|| compiler.pipeline_fact_metrics(&units, &params.metrics).unwrap());
    });
}

criterion_group!(
    benches,
    bench_fact_metrics_10,
    bench_fact_metrics_50,
    bench_pipeline_statements
);
criterion_main!(benches);
