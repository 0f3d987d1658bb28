//! Helpers for planning a pipeline run: metric groups, table names and
//! lookback dates.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHasher};
use tally_core::config::{PipelineConfig, WarehouseConfig};
use tally_core::model::{
    shift_hours, ExperimentBaseParams, FactMetric, PipelineFactMetricsParams, PipelineUnitsParams,
};

const MAX_NAME_PART: usize = 24;

/// Partition metrics by fact table, then split each partition into groups
/// of at most `max_per_group`. Order of first appearance is kept.
pub fn group_metrics(metrics: &[FactMetric], max_per_group: usize) -> Vec<Vec<FactMetric>> {
    let max_per_group = max_per_group.max(1);
    let mut order: Vec<&str> = Vec::new();
    let mut by_table: FxHashMap<&str, Vec<FactMetric>> = FxHashMap::default();
    for metric in metrics {
        let table = metric.fact_table_id();
        by_table
            .entry(table)
            .or_insert_with(|| {
                order.push(table);
                Vec::new()
            })
            .push(metric.clone());
    }
    order
        .into_iter()
        .filter_map(|table| by_table.remove(table))
        .flat_map(|metrics| {
            metrics
                .chunks(max_per_group)
                .map(<[FactMetric]>::to_vec)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Physical units table name for one experiment snapshot.
///
/// Parts are lowercased and reduced to `[a-z0-9_]`; a hash of the raw ids
/// keeps names distinct when sanitizing collapses them.
pub fn pipeline_table_name(prefix: &str, experiment_id: &str, snapshot_id: &str) -> String {
    let mut hasher = FxHasher::default();
    experiment_id.hash(&mut hasher);
    snapshot_id.hash(&mut hasher);
    format!(
        "{}_{}_{}_{:016x}",
        sanitize(prefix),
        sanitize(experiment_id),
        sanitize(snapshot_id),
        hasher.finish()
    )
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_NAME_PART)
        .collect();
    if cleaned.is_empty() {
        "x".to_string()
    } else {
        cleaned
    }
}

/// Start of the window a run recomputes: the previous high-water mark minus
/// a buffer for late-arriving data, never before the experiment start. The
/// first run starts at the experiment start.
pub fn lookback_date(
    previous_high_water: Option<DateTime<Utc>>,
    start_date: DateTime<Utc>,
    buffer_hours: u32,
) -> DateTime<Utc> {
    match previous_high_water {
        Some(high_water) => shift_hours(high_water, -i64::from(buffer_hours))
            .map_or(start_date, |ts| ts.max(start_date)),
        None => start_date,
    }
}

/// Assemble the params of a run from configuration. Tables are created in
/// the warehouse's default schema when one is configured.
pub fn pipeline_params(
    base: ExperimentBaseParams,
    metrics: &[FactMetric],
    snapshot_id: &str,
    previous_high_water: Option<DateTime<Utc>>,
    config: &PipelineConfig,
    warehouse: &WarehouseConfig,
) -> PipelineFactMetricsParams {
    let table_name = warehouse.table_path(&pipeline_table_name(
        config.effective_table_prefix(),
        &base.settings.experiment_id,
        snapshot_id,
    ));
    let lookback = lookback_date(
        previous_high_water,
        base.settings.start_date,
        config.effective_lookback_buffer_hours(),
    );
    PipelineFactMetricsParams {
        metric_groups: group_metrics(metrics, config.effective_max_metrics_per_group()),
        units: PipelineUnitsParams {
            base,
            table_name,
            lookback_date: lookback,
        },
    }
}
