//! Tests for the descriptor model.

use chrono::{TimeZone, Utc};
use tally_core::model::*;

fn settings() -> SnapshotSettings {
    SnapshotSettings::new(
        "checkout-redesign",
        ExposureQuery {
            id: "user_exposures".to_string(),
            user_id_type: "user_id".to_string(),
            sql: "SELECT * FROM exposures".to_string(),
            dimensions: vec!["browser".to_string()],
        },
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap(),
        vec!["0".to_string(), "1".to_string()],
    )
}

fn revenue() -> FactMetric {
    FactMetric::new(
        "revenue",
        "Revenue",
        MetricKind::Mean,
        ColumnRef::new("orders", "amount"),
    )
}

#[test]
fn test_descriptor_without_alias_uses_bare_columns() {
    let descriptor = MetricDescriptor::build(&revenue(), "", &settings()).unwrap();
    assert_eq!(descriptor.col("main_sum"), "main_sum");
    assert_eq!(descriptor.cap_coalesce_metric, "m.value");
    assert!(!descriptor.is_capped());
}

#[test]
fn test_descriptor_aliases() {
    let metrics = vec![revenue(), revenue()];
    let descriptors = MetricDescriptor::build_all(&metrics, &settings()).unwrap();
    assert_eq!(descriptors[0].alias, "m0");
    assert_eq!(descriptors[1].col("main_sum"), "m1_main_sum");
}

#[test]
fn test_regression_adjustment_extends_metric_start() {
    let mut metric = revenue();
    metric.regression_adjustment = RegressionAdjustment {
        enabled: true,
        days: 14,
    };
    let mut settings = settings();
    settings.regression_adjustment_enabled = true;

    let descriptor = MetricDescriptor::build(&metric, "m0", &settings).unwrap();
    assert!(descriptor.regression_adjusted);
    assert_eq!(descriptor.regression_adjustment_hours, 336);
    assert_eq!(
        descriptor.metric_start,
        Utc.with_ymd_and_hms(2024, 2, 16, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_regression_adjustment_needs_snapshot_opt_in() {
    let mut metric = revenue();
    metric.regression_adjustment = RegressionAdjustment {
        enabled: true,
        days: 14,
    };
    let descriptor = MetricDescriptor::build(&metric, "m0", &settings()).unwrap();
    assert!(!descriptor.regression_adjusted);
    assert_eq!(descriptor.regression_adjustment_hours, 0);
    assert_eq!(descriptor.metric_start, settings().start_date);
}

#[test]
fn test_regression_adjustment_never_applies_to_ratio_or_quantile() {
    let mut settings = settings();
    settings.regression_adjustment_enabled = true;
    let ra = RegressionAdjustment {
        enabled: true,
        days: 7,
    };

    let mut ratio = revenue();
    ratio.kind = MetricKind::Ratio;
    ratio.denominator = Some(ColumnRef::count("orders"));
    ratio.regression_adjustment = ra;
    assert!(!MetricDescriptor::build(&ratio, "m0", &settings).unwrap().regression_adjusted);

    let mut quantile = revenue();
    quantile.kind = MetricKind::Quantile(QuantileSettings {
        level: QuantileLevel::Unit,
        quantile: 0.9,
        ignore_zeros: false,
    });
    quantile.regression_adjustment = ra;
    let descriptor = MetricDescriptor::build(&quantile, "m0", &settings).unwrap();
    assert!(!descriptor.regression_adjusted);
    assert!(descriptor.quantile.is_some());
}

#[test]
fn test_conversion_window_extends_metric_end() {
    let mut metric = revenue();
    metric.window = MetricWindow::conversion(-2, 72);
    let descriptor = MetricDescriptor::build(&metric, "m0", &settings()).unwrap();
    assert_eq!(descriptor.min_metric_delay, -2);
    assert_eq!(descriptor.max_hours_to_convert, 70);
    assert_eq!(
        descriptor.metric_start,
        Utc.with_ymd_and_hms(2024, 2, 29, 22, 0, 0).unwrap()
    );
    assert_eq!(
        descriptor.metric_end,
        Utc.with_ymd_and_hms(2024, 3, 17, 22, 0, 0).unwrap()
    );
}

#[test]
fn test_lookback_window_and_partial_data_cutoff() {
    let mut metric = revenue();
    metric.window = MetricWindow::lookback(48);
    let descriptor = MetricDescriptor::build(&metric, "m0", &settings()).unwrap();
    assert_eq!(
        descriptor.lookback_start,
        Some(Utc.with_ymd_and_hms(2024, 3, 13, 0, 0, 0).unwrap())
    );
    assert_eq!(descriptor.last_complete_exposure, settings().end_date);

    metric.window = MetricWindow::conversion(0, 72);
    let descriptor = MetricDescriptor::build(&metric, "m0", &settings()).unwrap();
    assert_eq!(descriptor.lookback_start, None);
    assert_eq!(
        descriptor.last_complete_exposure,
        Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_out_of_range_windows_are_rejected() {
    let windows = [
        MetricWindow::conversion(0, u32::MAX),
        MetricWindow::conversion(i64::MAX, 1),
        MetricWindow::conversion(i64::MIN, 24),
        MetricWindow::lookback(u32::MAX),
    ];
    for window in windows {
        let mut metric = revenue();
        metric.window = window;
        match MetricDescriptor::build(&metric, "m0", &settings()) {
            Err(tally_core::errors::CompileError::InvalidMetric { metric_id, .. }) => {
                assert_eq!(metric_id, "revenue");
            }
            other => panic!("expected InvalidMetric for {window:?}, got {other:?}"),
        }
    }

    let mut metric = revenue();
    metric.regression_adjustment = RegressionAdjustment {
        enabled: true,
        days: u32::MAX,
    };
    let mut adjusted = settings();
    adjusted.regression_adjustment_enabled = true;
    assert!(MetricDescriptor::build(&metric, "m0", &adjusted).is_err());

    let mut metrics = vec![revenue(), revenue()];
    metrics[1].window = MetricWindow::conversion(0, u32::MAX);
    assert!(MetricDescriptor::build_all(&metrics, &settings()).is_err());
}

#[test]
fn test_percentile_capping_coalesce_expressions() {
    let mut metric = revenue();
    metric.capping = Capping::Percentile {
        percentile: 0.99,
        ignore_zeros: true,
    };
    let descriptor = MetricDescriptor::build(&metric, "m0", &settings()).unwrap();
    assert!(descriptor.is_percentile_capped);
    assert_eq!(
        descriptor.cap_coalesce_metric,
        "COALESCE(CASE WHEN cap.m0_value_cap < m.m0_value THEN cap.m0_value_cap ELSE m.m0_value END, m.m0_value)"
    );
    assert!(descriptor
        .cap_coalesce_covariate
        .contains("cap.m0_value_cap < m.m0_covariate"));
}

#[test]
fn test_absolute_capping_uses_literal() {
    let mut metric = revenue();
    metric.capping = Capping::Absolute { value: 100.0 };
    let descriptor = MetricDescriptor::build(&metric, "", &settings()).unwrap();
    assert!(!descriptor.is_percentile_capped);
    assert!(descriptor.is_capped());
    assert_eq!(
        descriptor.cap_coalesce_metric,
        "COALESCE(CASE WHEN 100.0 < m.value THEN 100.0 ELSE m.value END, m.value)"
    );
}

#[test]
fn test_format_number() {
    assert_eq!(format_number(3.0), "3.0");
    assert_eq!(format_number(0.25), "0.25");
    assert_eq!(format_number(-12.0), "-12.0");
}

#[test]
fn test_process_dimensions() {
    let mut settings = settings();
    let dimensions = vec![
        Dimension::experiment("country"),
        Dimension::Activation,
        Dimension::experiment("browser"),
        Dimension::user("plan", "SELECT user_id, plan AS value FROM accounts"),
    ];

    let processed = ProcessedDimensions::process(&dimensions, &settings);
    // `country` is not declared on the exposure query, no activation metric
    assert_eq!(processed.experiment_dimensions.len(), 1);
    assert_eq!(processed.experiment_dimensions[0].id, "browser");
    assert!(!processed.activation_dimension);
    assert_eq!(processed.unit_dimensions.len(), 1);
    assert_eq!(processed.slice, Some(Dimension::experiment("browser")));

    settings.activation_metric = Some(revenue());
    let processed = ProcessedDimensions::process(&dimensions, &settings);
    assert!(processed.activation_dimension);
    assert_eq!(processed.slice, Some(Dimension::Activation));
}

#[test]
fn test_dimension_serde_tags() {
    let json = serde_json::to_value(Dimension::DateCumulative).unwrap();
    assert_eq!(json["type"], "datecumulative");

    let parsed: Dimension = serde_json::from_str(
        r#"{"type":"experiment","id":"browser","specified_slices":["chrome","safari"]}"#,
    )
    .unwrap();
    match parsed {
        Dimension::Experiment(d) => {
            assert_eq!(d.id, "browser");
            assert_eq!(
                d.specified_slices,
                Some(vec!["chrome".to_string(), "safari".to_string()])
            );
        }
        other => panic!("Expected experiment dimension, got: {:?}", other),
    }
}

#[test]
fn test_dimension_names() {
    assert_eq!(Dimension::experiment("browser").name(), "dim_exp_browser");
    assert_eq!(Dimension::user("plan", "SELECT 1").name(), "dim_unit_plan");
    assert_eq!(Dimension::Date.name(), "date");
    assert!(Dimension::DateDaily.is_date());
    assert!(!Dimension::Activation.is_date());
}

#[test]
fn test_fact_table_id_types() {
    let table = FactTable {
        id: "orders".to_string(),
        name: "Orders".to_string(),
        sql: "SELECT * FROM orders".to_string(),
        user_id_types: vec!["user_id".to_string(), "anonymous_id".to_string()],
    };
    assert!(table.supports_id_type("anonymous_id"));
    assert!(!table.supports_id_type("company_id"));

    let map = fact_table_map(vec![table]);
    assert!(map.contains_key("orders"));
}

#[test]
fn test_past_experiment_min_users_default() {
    let params = PastExperimentParams {
        from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        exposure_queries: Vec::new(),
        min_users: None,
    };
    assert_eq!(params.effective_min_users(), 5);
}
