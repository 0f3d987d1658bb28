//! Property tests: metric descriptor bounds and numeric literal rendering.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use tally_core::model::*;

fn settings(ra_enabled: bool) -> SnapshotSettings {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut settings = SnapshotSettings::new(
        "exp",
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
    settings.regression_adjustment_enabled = ra_enabled;
    settings
}

fn kind_strategy() -> impl Strategy<Value = MetricKind> {
    prop_oneof![
        Just(MetricKind::Proportion),
        Just(MetricKind::Mean),
        Just(MetricKind::Ratio),
        (0.01f64..0.99).prop_map(|quantile| MetricKind::Quantile(QuantileSettings {
            level: QuantileLevel::Unit,
            quantile,
            ignore_zeros: false,
        })),
    ]
}

proptest! {
    #[test]
    fn prop_descriptor_bounds_cover_analysis_window(
        kind in kind_strategy(),
        delay in -72i64..72,
        hours in 0u32..720,
        ra_days in 0u32..30,
        ra_enabled in any::<bool>(),
    ) {
        let settings = settings(ra_enabled);
        let mut metric = FactMetric::new("m", "Metric", kind, ColumnRef::new("orders", "amount"));
        metric.window = MetricWindow::conversion(delay, hours);
        metric.regression_adjustment = RegressionAdjustment { enabled: true, days: ra_days };

        let d = MetricDescriptor::build(&metric, "m0", &settings).unwrap();
        prop_assert!(d.metric_start <= settings.start_date);
        prop_assert!(d.metric_end >= settings.end_date);
        prop_assert_eq!(d.max_hours_to_convert, delay + i64::from(hours));
        prop_assert!(d.min_metric_delay <= 0);

        if d.regression_adjusted {
            prop_assert!(ra_enabled && ra_days > 0);
            prop_assert!(!d.ratio && d.quantile.is_none());
            prop_assert_eq!(d.regression_adjustment_hours, i64::from(ra_days) * 24);
        } else {
            prop_assert_eq!(d.regression_adjustment_hours, 0);
        }
    }

    #[test]
    fn prop_format_number_parses_back(value in -1.0e9f64..1.0e9) {
        let rendered = format_number(value);
        prop_assert_eq!(rendered.parse::<f64>().unwrap(), value);
    }

    #[test]
    fn prop_uncapped_metric_is_left_alone(alias in "[a-z][a-z0-9]{0,4}") {
        let value = format!("m.{alias}_value");
        prop_assert_eq!(cap_coalesce(Capping::None, &value, "cap.x"), value);
    }
}
