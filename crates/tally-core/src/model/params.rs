//! Query parameter bundles, one per query kind.
//!
//! Each bundle is built right before compilation and never mutated. The
//! compiler reads nothing but these values, so identical params always
//! yield identical SQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dimension::{Dimension, ExperimentDimension};
use super::experiment::{ExposureQuery, Segment, SnapshotSettings};
use super::fact_table::{FactTable, FactTableMap};
use super::metric::FactMetric;

/// Minimum distinct units for a past experiment variation to be reported.
pub const DEFAULT_PAST_EXPERIMENT_MIN_USERS: u64 = 5;
/// Row cap applied to ad-hoc test queries.
pub const DEFAULT_TEST_QUERY_LIMIT: usize = 5;
/// Row cap applied to column top-value discovery.
pub const DEFAULT_TOP_VALUES_LIMIT: usize = 50;
/// Number of histogram bins in metric analysis rows.
pub const HISTOGRAM_BINS: usize = 25;

/// Inputs shared by every experiment-scoped query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentBaseParams {
    pub settings: SnapshotSettings,
    pub fact_tables: FactTableMap,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub segment: Option<Segment>,
}

impl ExperimentBaseParams {
    pub fn new(settings: SnapshotSettings, fact_tables: FactTableMap) -> Self {
        Self {
            settings,
            fact_tables,
            dimensions: Vec::new(),
            segment: None,
        }
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segment = Some(segment);
        self
    }
}

/// Experiment units: a SELECT, or `CREATE TABLE .. AS` when a table is named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentUnitsParams {
    pub base: ExperimentBaseParams,
    #[serde(default)]
    pub units_table_full_name: Option<String>,
}

/// One metric, optionally restricted to units converting on every
/// denominator metric first (funnel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetricParams {
    pub base: ExperimentBaseParams,
    pub metric: FactMetric,
    #[serde(default)]
    pub denominator_metrics: Vec<FactMetric>,
    /// Read units from this materialized table instead of recomputing them.
    #[serde(default)]
    pub units_table: Option<String>,
}

/// Several metrics over one fact table, columns prefixed `m{i}_`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentFactMetricsParams {
    pub base: ExperimentBaseParams,
    pub metrics: Vec<FactMetric>,
    #[serde(default)]
    pub units_table: Option<String>,
}

/// Unit counts per variation and dimension value (health / traffic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAggregateUnitsParams {
    pub base: ExperimentBaseParams,
    #[serde(default)]
    pub units_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValueParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub metric: FactMetric,
    pub user_id_type: String,
    pub fact_tables: FactTableMap,
    #[serde(default)]
    pub segment: Option<Segment>,
    #[serde(default)]
    pub include_by_date: bool,
}

/// Which units a metric analysis covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MetricPopulation {
    /// Every unit with a row in the metric's fact table.
    FactTable,
    Segment(Segment),
    ExposureQuery(ExposureQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnalysisSettings {
    pub user_id_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub population: MetricPopulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnalysisParams {
    pub settings: MetricAnalysisSettings,
    pub metric: FactMetric,
    pub fact_tables: FactTableMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastExperimentParams {
    pub from: DateTime<Utc>,
    pub exposure_queries: Vec<ExposureQuery>,
    #[serde(default)]
    pub min_users: Option<u64>,
}

impl PastExperimentParams {
    pub fn effective_min_users(&self) -> u64 {
        self.min_users.unwrap_or(DEFAULT_PAST_EXPERIMENT_MIN_USERS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSlicesParams {
    pub exposure_query: ExposureQuery,
    pub dimensions: Vec<ExperimentDimension>,
    pub lookback_days: u32,
    /// End of the lookback window. Carried explicitly so compilation never
    /// reads the clock.
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTableParams {
    pub full_table_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTopValuesParams {
    pub fact_table: FactTable,
    pub column: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestQueryParams {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Units stages of the incremental pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineUnitsParams {
    pub base: ExperimentBaseParams,
    pub table_name: String,
    /// Start of the window this run (re)computes.
    pub lookback_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTrimMetricsParams {
    pub table_name: String,
    pub lookback_date: DateTime<Utc>,
}

/// Fact-metric and statistics stages of the incremental pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFactMetricsParams {
    pub units: PipelineUnitsParams,
    /// Each group is computed by its own statement.
    pub metric_groups: Vec<Vec<FactMetric>>,
}

impl PipelineFactMetricsParams {
    pub fn trim_params(&self) -> PipelineTrimMetricsParams {
        PipelineTrimMetricsParams {
            table_name: self.units.table_name.clone(),
            lookback_date: self.units.lookback_date,
        }
    }

    /// All metrics in group order.
    pub fn metrics(&self) -> impl Iterator<Item = &FactMetric> {
        self.metric_groups.iter().flatten()
    }
}
