//! Fact metrics and the per-request metric descriptor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::experiment::SnapshotSettings;
use crate::errors::CompileError;
use super::fact_table::ColumnRef;

/// Whether a quantile is taken over events or over per-unit totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantileLevel {
    Event,
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantileSettings {
    pub level: QuantileLevel,
    /// Target quantile in (0, 1).
    pub quantile: f64,
    #[serde(default)]
    pub ignore_zeros: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MetricKind {
    Proportion,
    Mean,
    Ratio,
    Quantile(QuantileSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKind {
    #[default]
    None,
    /// Counted from `first exposure + delay` for `window_hours`.
    Conversion,
    /// Only the last `window_hours` before the analysis end.
    Lookback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MetricWindow {
    #[serde(default)]
    pub kind: WindowKind,
    #[serde(default)]
    pub delay_hours: i64,
    #[serde(default)]
    pub window_hours: u32,
}

impl MetricWindow {
    pub fn conversion(delay_hours: i64, window_hours: u32) -> Self {
        Self {
            kind: WindowKind::Conversion,
            delay_hours,
            window_hours,
        }
    }

    pub fn lookback(window_hours: u32) -> Self {
        Self {
            kind: WindowKind::Lookback,
            delay_hours: 0,
            window_hours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Capping {
    #[default]
    None,
    Absolute { value: f64 },
    Percentile { percentile: f64, ignore_zeros: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RegressionAdjustment {
    pub enabled: bool,
    pub days: u32,
}

/// A metric computed from event-level fact rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactMetric {
    pub id: String,
    pub name: String,
    pub kind: MetricKind,
    pub numerator: ColumnRef,
    /// Required for ratio metrics, ignored otherwise.
    #[serde(default)]
    pub denominator: Option<ColumnRef>,
    #[serde(default)]
    pub window: MetricWindow,
    #[serde(default)]
    pub capping: Capping,
    #[serde(default)]
    pub regression_adjustment: RegressionAdjustment,
}

impl FactMetric {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: MetricKind,
        numerator: ColumnRef,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            numerator,
            denominator: None,
            window: MetricWindow::default(),
            capping: Capping::None,
            regression_adjustment: RegressionAdjustment::default(),
        }
    }

    pub fn is_ratio(&self) -> bool {
        matches!(self.kind, MetricKind::Ratio)
    }

    pub fn quantile_settings(&self) -> Option<QuantileSettings> {
        match self.kind {
            MetricKind::Quantile(settings) => Some(settings),
            _ => None,
        }
    }

    pub fn fact_table_id(&self) -> &str {
        &self.numerator.fact_table_id
    }
}

/// A metric resolved against one analysis request.
///
/// Column names are derived from `alias`: `m0` yields `m0_value`,
/// `m0_main_sum`, ...; an empty alias yields `value`, `main_sum`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub alias: String,
    pub metric: FactMetric,
    pub ratio: bool,
    pub quantile: Option<QuantileSettings>,
    pub regression_adjusted: bool,
    pub regression_adjustment_hours: i64,
    pub is_percentile_capped: bool,
    pub cap_coalesce_metric: String,
    pub cap_coalesce_denominator: String,
    pub cap_coalesce_covariate: String,
    pub min_metric_delay: i64,
    pub metric_start: DateTime<Utc>,
    pub metric_end: DateTime<Utc>,
    pub max_hours_to_convert: i64,
    /// Earliest fact timestamp of a lookback window.
    pub lookback_start: Option<DateTime<Utc>>,
    /// Latest first exposure with a complete conversion window.
    pub last_complete_exposure: DateTime<Utc>,
}

impl MetricDescriptor {
    /// Resolve `metric` for a request. `alias` may be empty for
    /// single-metric queries. Fails when a window moves a date out of the
    /// representable range.
    pub fn build(
        metric: &FactMetric,
        alias: impl Into<String>,
        settings: &SnapshotSettings,
    ) -> Result<Self, CompileError> {
        let alias = alias.into();
        let ratio = metric.is_ratio();
        let quantile = metric.quantile_settings();
        let out_of_range = || window_out_of_range(&metric.id);

        let regression_adjusted = settings.regression_adjustment_enabled
            && metric.regression_adjustment.enabled
            && metric.regression_adjustment.days > 0
            && !ratio
            && quantile.is_none();
        let regression_adjustment_hours = if regression_adjusted {
            i64::from(metric.regression_adjustment.days) * 24
        } else {
            0
        };

        let window = metric.window;
        let min_metric_delay = window.delay_hours.min(0);
        let max_hours_to_convert = match window.kind {
            WindowKind::Conversion => window
                .delay_hours
                .checked_add(i64::from(window.window_hours))
                .ok_or_else(out_of_range)?,
            _ => 0,
        };

        let metric_start = shift_hours(settings.start_date, -regression_adjustment_hours)
            .and_then(|ts| shift_hours(ts, min_metric_delay))
            .ok_or_else(out_of_range)?;
        let metric_end = shift_hours(settings.end_date, max_hours_to_convert.max(0))
            .ok_or_else(out_of_range)?;
        let lookback_start = match window.kind {
            WindowKind::Lookback => Some(
                shift_hours(settings.end_date, -i64::from(window.window_hours))
                    .ok_or_else(out_of_range)?,
            ),
            _ => None,
        };
        let last_complete_exposure = shift_hours(settings.end_date, -max_hours_to_convert.max(0))
            .ok_or_else(out_of_range)?;

        let col = |name: &str| column_name(&alias, name);
        let is_percentile_capped = matches!(metric.capping, Capping::Percentile { .. });
        let value_cap = format!("cap.{}", col("value_cap"));
        let cap_coalesce_metric =
            cap_coalesce(metric.capping, &format!("m.{}", col("value")), &value_cap);
        let cap_coalesce_denominator = cap_coalesce(
            metric.capping,
            &format!("m.{}", col("denominator")),
            &format!("cap.{}", col("denominator_cap")),
        );
        let cap_coalesce_covariate =
            cap_coalesce(metric.capping, &format!("m.{}", col("covariate")), &value_cap);

        Ok(Self {
            alias,
            metric: metric.clone(),
            ratio,
            quantile,
            regression_adjusted,
            regression_adjustment_hours,
            is_percentile_capped,
            cap_coalesce_metric,
            cap_coalesce_denominator,
            cap_coalesce_covariate,
            min_metric_delay,
            metric_start,
            metric_end,
            max_hours_to_convert,
            lookback_start,
            last_complete_exposure,
        })
    }

    /// Resolve a list of metrics with aliases `m0`, `m1`, ...
    pub fn build_all(
        metrics: &[FactMetric],
        settings: &SnapshotSettings,
    ) -> Result<Vec<Self>, CompileError> {
        metrics
            .iter()
            .enumerate()
            .map(|(i, m)| Self::build(m, format!("m{i}"), settings))
            .collect()
    }

    /// Column name for this metric, e.g. `col("main_sum")` -> `m0_main_sum`.
    pub fn col(&self, name: &str) -> String {
        column_name(&self.alias, name)
    }

    pub fn is_capped(&self) -> bool {
        !matches!(self.metric.capping, Capping::None)
    }
}

fn column_name(alias: &str, name: &str) -> String {
    if alias.is_empty() {
        name.to_string()
    } else {
        format!("{alias}_{name}")
    }
}

/// Apply `capping` to the SQL expression `value`.
///
/// Renders `COALESCE(LEAST(cap, value), value)` without dialect functions.
/// `percentile_cap` is the column holding the computed percentile cap and
/// is only used for percentile capping.
pub fn cap_coalesce(capping: Capping, value: &str, percentile_cap: &str) -> String {
    let cap = match capping {
        Capping::None => return value.to_string(),
        Capping::Absolute { value: cap } => format_number(cap),
        Capping::Percentile { .. } => percentile_cap.to_string(),
    };
    format!("COALESCE(CASE WHEN {cap} < {value} THEN {cap} ELSE {value} END, {value})")
}

/// Render a float as a SQL numeric literal.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// `ts` moved by `hours`, or `None` outside chrono's range.
pub fn shift_hours(ts: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    ts.checked_add_signed(Duration::try_hours(hours)?)
}

pub fn window_out_of_range(metric_id: &str) -> CompileError {
    CompileError::InvalidMetric {
        metric_id: metric_id.to_string(),
        message: "metric window moves a date out of the supported range".to_string(),
    }
}
