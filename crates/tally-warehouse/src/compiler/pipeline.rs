//! Incremental pipeline statements.
//!
//! Each experiment snapshot owns a units table `T` and a companion metrics
//! table `T_metrics` holding one row per unit, metric, value kind and day.
//! A run only rescans history from its lookback date onward.

use chrono::{DateTime, NaiveTime, Utc};
use tally_core::errors::CompileError;
use tally_core::model::{
    shift_hours, window_out_of_range, ColumnAggregation, FactMetric, MetricDescriptor, MetricKind,
    PipelineFactMetricsParams, PipelineTrimMetricsParams, PipelineUnitsParams,
    ProcessedDimensions, QuantileLevel, SnapshotSettings, DISTINCT_USERS_COLUMN,
    MULTIPLE_EXPOSURES_VARIATION,
};

use super::metrics::{metric_range, shared_fact_table, unit_rollup, validate_metric};
use super::{ident, table_path, CteBuilder, SqlCompiler};

/// Kind of value stored in the metrics table.
pub const VALUE_KIND_MAIN: &str = "main";
pub const VALUE_KIND_DENOMINATOR: &str = "denominator";
pub const VALUE_KIND_COVARIATE: &str = "covariate";

const PIPELINE_CONTEXT: &str = "incremental pipeline";

/// Name of the metrics table paired with units table `table`.
pub fn metrics_table_name(table: &str) -> String {
    format!("{table}_metrics")
}

impl SqlCompiler<'_> {
    /// DDL for the units table and its metrics companion, separated by `;`.
    /// Existing tables are kept so later runs only append.
    pub fn pipeline_create_units(&self, params: &PipelineUnitsParams) -> Result<String, CompileError> {
        let d = self.dialect;
        let table = table_path(&params.table_name)?;
        let settings = &params.base.settings;
        reject_activation(settings)?;
        let uid = ident(settings.user_id_type())?;
        let dims = ProcessedDimensions::process(&params.base.dimensions, settings);

        let string = d.string_type();
        let mut columns = vec![
            format!("{uid} {string}"),
            format!("variation {string}"),
            format!("first_exposure_timestamp {}", d.timestamp_type()),
        ];
        for name in self.unit_column_names(uid, &dims)?.into_iter().skip(3) {
            columns.push(format!("{name} {string}"));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n  {}\n);\nCREATE TABLE IF NOT EXISTS {} (\n  {uid} {string},\n  metric_id {string},\n  value_kind {string},\n  metric_date {string},\n  value {}\n)",
            columns.join(",\n  "),
            metrics_table_name(table),
            d.float_type(),
        ))
    }

    /// Insert units exposed at or after the lookback date that the table
    /// does not hold yet, then move stored units seen in another variation
    /// since the lookback date to the multiple-exposures variation. Two
    /// statements separated by `;`.
    pub fn pipeline_populate_units(
        &self,
        params: &PipelineUnitsParams,
    ) -> Result<String, CompileError> {
        let table = table_path(&params.table_name)?;
        let base = &params.base;
        reject_activation(&base.settings)?;
        let uid = ident(base.settings.user_id_type())?;
        let dims = ProcessedDimensions::process(&base.dimensions, &base.settings);
        let columns = self.unit_column_names(uid, &dims)?.join(", ");
        let exposure_start = params.lookback_date.max(base.settings.start_date);

        let mut ctes = CteBuilder::new();
        self.push_units_ctes(&mut ctes, base, &dims, exposure_start)?;
        let select = ctes.finish(&format!(
            "SELECT {columns}\nFROM __experimentUnits u\nWHERE NOT EXISTS (\nSELECT 1 FROM {table} t WHERE t.{uid} = u.{uid}\n)"
        ));

        let mut ctes = CteBuilder::new();
        self.push_units_ctes(&mut ctes, base, &dims, exposure_start)?;
        let reexposed = ctes.finish(&format!(
            "SELECT 1\nFROM __experimentUnits n\nWHERE n.{uid} = t.{uid}\n  AND n.variation <> t.variation"
        ));
        let multiple = self.dialect.string_literal(MULTIPLE_EXPOSURES_VARIATION);

        Ok(format!(
            "INSERT INTO {table} ({columns})\n{select};\nUPDATE {table} AS t\nSET variation = {multiple}\nWHERE t.variation <> {multiple}\n  AND EXISTS (\n{reexposed}\n)"
        ))
    }

    /// Delete metric rows the run is about to recompute.
    pub fn pipeline_trim_metrics(
        &self,
        params: &PipelineTrimMetricsParams,
    ) -> Result<String, CompileError> {
        let table = table_path(&params.table_name)?;
        Ok(format!(
            "DELETE FROM {}\nWHERE metric_date >= {}",
            metrics_table_name(table),
            self.dialect.date_string_literal(params.lookback_date)
        ))
    }

    /// Insert per-unit per-day values for one metric group, from the start
    /// of the lookback day onward.
    pub fn pipeline_fact_metrics(
        &self,
        params: &PipelineUnitsParams,
        group: &[FactMetric],
    ) -> Result<String, CompileError> {
        let d = self.dialect;
        let table = table_path(&params.table_name)?;
        let settings = &params.base.settings;
        validate_pipeline_metrics(settings, group)?;
        let uid = ident(settings.user_id_type())?;
        let descriptors = MetricDescriptor::build_all(group, settings)?;
        let fact_table = shared_fact_table(&params.base.fact_tables, &descriptors, uid)?;

        let boundary = day_start(params.lookback_date);
        let max_ra = descriptors
            .iter()
            .map(|m| m.regression_adjustment_hours)
            .max()
            .unwrap_or(0);
        let min_delay = descriptors
            .iter()
            .map(|m| m.min_metric_delay)
            .min()
            .unwrap_or(0);
        let (_, to) = metric_range(&descriptors);
        let from = shift_hours(boundary, -max_ra)
            .and_then(|ts| shift_hours(ts, min_delay))
            .ok_or_else(|| window_out_of_range(group.first().map_or("", |m| m.id.as_str())))?;

        let mut ctes = CteBuilder::new();
        ctes.push(
            "__units",
            format!("SELECT\n  u.{uid} AS {uid},\n  u.first_exposure_timestamp AS first_exposure_timestamp\nFROM {table} u"),
        );
        ctes.push(
            "__factTable",
            self.fact_table_cte(fact_table, uid, &descriptors, from, to)?,
        );

        let mut main_columns = vec![
            format!("u.{uid} AS {uid}"),
            format!("{} AS metric_date", d.format_date("f.timestamp")),
        ];
        let mut covariate_columns = vec![
            format!("u.{uid} AS {uid}"),
            format!("{} AS metric_date", d.format_date("u.first_exposure_timestamp")),
        ];
        for m in &descriptors {
            let window = self.window_condition(m, "u.first_exposure_timestamp");
            let value = m.col("value");
            main_columns.push(format!("CASE WHEN {window} THEN f.{value} ELSE NULL END AS {value}"));
            if m.ratio {
                let denominator = m.col("denominator");
                main_columns.push(format!(
                    "CASE WHEN {window} THEN f.{denominator} ELSE NULL END AS {denominator}"
                ));
            }
            if m.regression_adjusted {
                covariate_columns.push(format!(
                    "CASE WHEN {} THEN f.{value} ELSE NULL END AS {}",
                    self.covariate_condition(m, "u.first_exposure_timestamp"),
                    m.col("covariate")
                ));
            }
        }
        ctes.push(
            "__userFactJoin",
            format!(
                "SELECT\n  {}\nFROM __units u\nJOIN __factTable f ON f.{uid} = u.{uid}\nWHERE f.timestamp >= {}",
                main_columns.join(",\n  "),
                d.timestamp_literal(boundary),
            ),
        );
        let adjusted = descriptors.iter().any(|m| m.regression_adjusted);
        if adjusted {
            ctes.push(
                "__covariateJoin",
                format!(
                    "SELECT\n  {}\nFROM __units u\nJOIN __factTable f ON f.{uid} = u.{uid}\nWHERE u.first_exposure_timestamp >= {}",
                    covariate_columns.join(",\n  "),
                    d.timestamp_literal(boundary),
                ),
            );
        }

        let mut arms = Vec::new();
        for m in &descriptors {
            let metric = &m.metric;
            let mut kinds = vec![(VALUE_KIND_MAIN, "__userFactJoin", m.col("value"))];
            if m.ratio {
                kinds.push((VALUE_KIND_DENOMINATOR, "__userFactJoin", m.col("denominator")));
            }
            if m.regression_adjusted {
                kinds.push((VALUE_KIND_COVARIATE, "__covariateJoin", m.col("covariate")));
            }
            for (kind, source, column) in kinds {
                let rollup = if kind == VALUE_KIND_DENOMINATOR {
                    metric.denominator.as_ref().map(|c| c.aggregation)
                } else {
                    Some(metric.numerator.aggregation)
                };
                let max = matches!(metric.kind, MetricKind::Proportion)
                    || (kind != VALUE_KIND_DENOMINATOR
                        && metric.numerator.column == DISTINCT_USERS_COLUMN)
                    || rollup == Some(ColumnAggregation::Max);
                let aggregate = if max { "MAX" } else { "SUM" };
                arms.push(format!(
                    "SELECT\n  j.{uid} AS {uid},\n  {} AS metric_id,\n  {} AS value_kind,\n  j.metric_date AS metric_date,\n  {aggregate}(j.{column}) AS value\nFROM {source} j\nWHERE j.{column} IS NOT NULL\nGROUP BY j.{uid}, j.metric_date",
                    d.string_literal(&metric.id),
                    d.string_literal(kind),
                ));
            }
        }
        ctes.push("__metricRows", arms.join("\nUNION ALL\n"));

        let columns = format!("{uid}, metric_id, value_kind, metric_date, value");
        let select = ctes.finish(&format!("SELECT {columns}\nFROM __metricRows"));
        Ok(format!(
            "INSERT INTO {} ({columns})\n{select}",
            metrics_table_name(table)
        ))
    }

    /// Fact-metrics-shaped statistics over every stored group.
    pub fn pipeline_statistics(
        &self,
        params: &PipelineFactMetricsParams,
    ) -> Result<String, CompileError> {
        let units = &params.units;
        let table = table_path(&units.table_name)?;
        let settings = &units.base.settings;
        let metrics: Vec<FactMetric> = params.metrics().cloned().collect();
        if metrics.is_empty() {
            return Err(CompileError::NoMetrics);
        }
        validate_pipeline_metrics(settings, &metrics)?;
        let uid = ident(settings.user_id_type())?;
        let dims = ProcessedDimensions::process(&units.base.dimensions, settings);
        let descriptors = MetricDescriptor::build_all(&metrics, settings)?;

        let mut ctes = CteBuilder::new();
        ctes.push("__experimentUnits", format!("SELECT * FROM {table}"));
        self.push_distinct_users(&mut ctes, settings, &dims, uid, &descriptors)?;
        ctes.push(
            "__metricRows",
            format!("SELECT * FROM {}", metrics_table_name(table)),
        );

        let d = self.dialect;
        let mut columns = vec![
            "d.variation AS variation".to_string(),
            "d.dimension AS dimension".to_string(),
            format!("d.{uid} AS {uid}"),
        ];
        for m in &descriptors {
            let metric = &m.metric;
            let id = d.string_literal(&metric.id);
            let stored = |kind: &str| {
                format!(
                    "CASE WHEN r.metric_id = {id} AND r.value_kind = {} THEN r.value ELSE NULL END",
                    d.string_literal(kind)
                )
            };
            columns.push(format!(
                "{} AS {}",
                unit_rollup(metric, &metric.numerator, &stored(VALUE_KIND_MAIN)),
                m.col("value")
            ));
            if let (true, Some(denominator)) = (m.ratio, &metric.denominator) {
                columns.push(format!(
                    "{} AS {}",
                    unit_rollup(metric, denominator, &stored(VALUE_KIND_DENOMINATOR)),
                    m.col("denominator")
                ));
            }
            if m.regression_adjusted {
                columns.push(format!(
                    "{} AS {}",
                    unit_rollup(metric, &metric.numerator, &stored(VALUE_KIND_COVARIATE)),
                    m.col("covariate")
                ));
            }
        }
        ctes.push(
            "__userMetricAgg",
            format!(
                "SELECT\n  {}\nFROM __distinctUsers d\nLEFT JOIN __metricRows r ON r.{uid} = d.{uid}\nGROUP BY d.variation, d.dimension, d.{uid}",
                columns.join(",\n  ")
            ),
        );

        let select = self.push_statistics(&mut ctes, &descriptors, None)?;
        Ok(ctes.finish(&select))
    }
}

/// Start of the UTC day containing `ts`.
pub(crate) fn day_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn reject_activation(settings: &SnapshotSettings) -> Result<(), CompileError> {
    match &settings.activation_metric {
        Some(metric) => Err(CompileError::UnsupportedMetric {
            metric_id: metric.id.clone(),
            context: PIPELINE_CONTEXT.to_string(),
        }),
        None => Ok(()),
    }
}

/// Metrics the pipeline cannot store as daily partial values.
fn validate_pipeline_metrics(
    settings: &SnapshotSettings,
    metrics: &[FactMetric],
) -> Result<(), CompileError> {
    reject_activation(settings)?;
    for metric in metrics {
        validate_metric(metric)?;
        let count_distinct = metric.numerator.aggregation == ColumnAggregation::CountDistinct
            || metric
                .denominator
                .as_ref()
                .is_some_and(|c| c.aggregation == ColumnAggregation::CountDistinct);
        let event_quantile = metric
            .quantile_settings()
            .is_some_and(|q| q.level == QuantileLevel::Event);
        if count_distinct || event_quantile {
            return Err(CompileError::UnsupportedMetric {
                metric_id: metric.id.clone(),
                context: PIPELINE_CONTEXT.to_string(),
            });
        }
    }
    Ok(())
}
