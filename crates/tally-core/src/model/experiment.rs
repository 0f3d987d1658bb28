//! Experiment-level descriptors: exposure queries, segments, snapshot settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metric::FactMetric;

/// Variation value used for units exposed to more than one variation.
pub const MULTIPLE_EXPOSURES_VARIATION: &str = "__multiple__";

/// Defines which units were exposed to which experiment variation, and when.
///
/// The SQL must yield the identifier column named by `user_id_type`,
/// `timestamp`, `experiment_id`, `variation_id`, plus every column listed
/// in `dimensions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureQuery {
    pub id: String,
    pub user_id_type: String,
    pub sql: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// A unit population restriction.
/// The SQL yields the identifier column and a `date` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub user_id_type: String,
    pub sql: String,
}

/// Settings of one analysis snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    /// Tracking key matched against `experiment_id` in the exposure query.
    pub experiment_id: String,
    pub exposure_query: ExposureQuery,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Variation keys in display order.
    pub variations: Vec<String>,
    #[serde(default)]
    pub activation_metric: Option<FactMetric>,
    #[serde(default)]
    pub regression_adjustment_enabled: bool,
    /// Drop units whose conversion window extends past `end_date`.
    #[serde(default)]
    pub skip_partial_data: bool,
}

impl SnapshotSettings {
    pub fn new(
        experiment_id: impl Into<String>,
        exposure_query: ExposureQuery,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        variations: Vec<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            exposure_query,
            start_date,
            end_date,
            variations,
            activation_metric: None,
            regression_adjustment_enabled: false,
            skip_partial_data: false,
        }
    }

    pub fn user_id_type(&self) -> &str {
        &self.exposure_query.user_id_type
    }
}
