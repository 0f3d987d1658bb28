//! Incremental pipeline configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the incremental refresh pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max metrics compiled into one fact-metric statement. Default: 10.
    pub max_metrics_per_group: Option<usize>,
    /// Prefix for physical pipeline tables. Default: "tally_pipeline".
    pub table_prefix: Option<String>,
    /// Hours subtracted from the previous run's high-water mark when
    /// computing the next lookback date. Default: 24.
    pub lookback_buffer_hours: Option<u32>,
}

impl PipelineConfig {
    /// Returns the effective metric group size, defaulting to 10.
    pub fn effective_max_metrics_per_group(&self) -> usize {
        self.max_metrics_per_group.unwrap_or(10).max(1)
    }

    /// Returns the effective table prefix, defaulting to `tally_pipeline`.
    pub fn effective_table_prefix(&self) -> &str {
        self.table_prefix.as_deref().unwrap_or("tally_pipeline")
    }

    /// Returns the effective lookback buffer, defaulting to 24 hours.
    pub fn effective_lookback_buffer_hours(&self) -> u32 {
        self.lookback_buffer_hours.unwrap_or(24)
    }
}
