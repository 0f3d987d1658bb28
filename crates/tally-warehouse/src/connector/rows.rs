//! Typed result rows per query kind.
//!
//! Warehouses disagree on how they return numbers and booleans (BigQuery
//! sends integers as strings, SQLite sends booleans as 0/1), so numeric and
//! boolean fields go through lenient deserializers.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::errors::WarehouseError;
use tally_core::model::HISTOGRAM_BINS;

use super::job::{QueryResponse, RawQueryResult};

/// Per variation (and dimension) statistics of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetricRow {
    #[serde(deserialize_with = "lenient_string")]
    pub variation: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dimension: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub users: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub count: u64,
    #[serde(deserialize_with = "lenient_f64")]
    pub main_sum: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub main_sum_squares: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub denominator_sum: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub denominator_sum_squares: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub main_denominator_sum_product: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub covariate_sum: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub covariate_sum_squares: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub main_covariate_sum_product: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub main_cap_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub denominator_cap_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub quantile: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub quantile_n: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub quantile_lower: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub quantile_upper: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub quantile_nstar: Option<f64>,
}

/// Statistics of several metrics; metric columns are prefixed `m{i}_`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactMetricsRow {
    #[serde(deserialize_with = "lenient_string")]
    pub variation: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dimension: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub users: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub count: u64,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, Value>,
}

impl FactMetricsRow {
    /// Column `name` of metric `index`, e.g. `value(0, "main_sum")`.
    pub fn value(&self, index: usize, name: &str) -> Option<f64> {
        self.metrics
            .get(&format!("m{index}_{name}"))
            .and_then(value_as_f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateUnitsRow {
    #[serde(deserialize_with = "lenient_string")]
    pub variation: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dimension_value: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dimension_name: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValueRow {
    /// Empty for the overall row.
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub count: u64,
    #[serde(deserialize_with = "lenient_f64")]
    pub main_sum: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub main_sum_squares: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnalysisRow {
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    /// `overall` or `date`.
    #[serde(deserialize_with = "lenient_string")]
    pub data_type: String,
    #[serde(deserialize_with = "lenient_bool")]
    pub capped: bool,
    #[serde(deserialize_with = "lenient_u64")]
    pub units: u64,
    #[serde(deserialize_with = "lenient_f64")]
    pub main_sum: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub main_sum_squares: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub denominator_sum: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub denominator_sum_squares: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub main_denominator_sum_product: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub value_min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub value_max: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub bin_width: Option<f64>,
    /// `units_bin_0` .. `units_bin_24`.
    #[serde(flatten)]
    pub bins: BTreeMap<String, Value>,
}

impl MetricAnalysisRow {
    pub fn is_overall(&self) -> bool {
        self.data_type == "overall"
    }

    /// Histogram counts in bin order. `None` on daily rows.
    pub fn histogram(&self) -> Option<Vec<u64>> {
        (0..HISTOGRAM_BINS)
            .map(|i| {
                self.bins
                    .get(&format!("units_bin_{i}"))
                    .and_then(value_as_f64)
                    .map(|v| v as u64)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastExperimentRow {
    #[serde(deserialize_with = "lenient_string")]
    pub exposure_query: String,
    #[serde(deserialize_with = "lenient_string")]
    pub experiment_id: String,
    #[serde(default)]
    pub experiment_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub variation_id: String,
    #[serde(default)]
    pub variation_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub start_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub end_date: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub users: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub latest_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSliceRow {
    #[serde(deserialize_with = "lenient_string")]
    pub dimension_value: String,
    #[serde(deserialize_with = "lenient_string")]
    pub dimension_name: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub units: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub total_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopValueRow {
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub count: u64,
}

/// Decode raw rows into `R`. `kind` names the query kind in errors.
pub fn decode_rows<R: DeserializeOwned>(
    kind: &'static str,
    raw: RawQueryResult,
) -> Result<QueryResponse<R>, WarehouseError> {
    let rows = raw
        .rows
        .into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|e| WarehouseError::RowDecode {
                kind,
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<R>, _>>()?;
    Ok(QueryResponse {
        rows,
        statistics: raw.statistics,
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        other => value_as_f64(&other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a number, got {other}"))),
    }
}

/// NULL (e.g. SUM over no rows) reads as zero.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(lenient_opt_f64(deserializer)?.unwrap_or(0.0))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = lenient_f64(deserializer)?;
    if value < 0.0 || !value.is_finite() {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative count, got {value}"
        )));
    }
    Ok(value.round() as u64)
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::String(s) => Ok(matches!(s.to_ascii_lowercase().as_str(), "true" | "1")),
        other => value_as_f64(&other)
            .map(|v| v != 0.0)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a boolean, got {other}"))),
    }
}
