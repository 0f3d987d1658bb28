//! Experiment metric aggregation.
//!
//! Per-unit values are computed inside each metric's window relative to the
//! unit's first exposure, then rolled up per variation and dimension into
//! sums, sums of squares and cross products.

use chrono::{DateTime, Utc};
use tally_core::errors::CompileError;
use tally_core::model::{
    format_number, Capping, ColumnAggregation, ColumnRef, ExperimentBaseParams,
    ExperimentFactMetricsParams, ExperimentMetricParams, FactMetric, FactTable, FactTableMap, MetricDescriptor, MetricKind,
    ProcessedDimensions, QuantileLevel, SnapshotSettings, WindowKind, DISTINCT_USERS_COLUMN,
    MULTIPLE_EXPOSURES_VARIATION,
};

use super::quantile;
use super::{fact_table_for, ident, subquery_sql, CteBuilder, SqlCompiler};

impl SqlCompiler<'_> {
    /// One metric with unprefixed statistic columns (`main_sum`, ...).
    pub fn experiment_metric(&self, params: &ExperimentMetricParams) -> Result<String, CompileError> {
        let descriptor = MetricDescriptor::build(&params.metric, "", &params.base.settings)?;
        self.experiment_metrics_sql(
            &params.base,
            &[descriptor],
            &params.denominator_metrics,
            params.units_table.as_deref(),
        )
    }

    /// Several metrics over one fact table, statistic columns prefixed
    /// `m0_`, `m1_`, ...
    pub fn experiment_fact_metrics(
        &self,
        params: &ExperimentFactMetricsParams,
    ) -> Result<String, CompileError> {
        let descriptors = MetricDescriptor::build_all(&params.metrics, &params.base.settings)?;
        self.experiment_metrics_sql(&params.base, &descriptors, &[], params.units_table.as_deref())
    }

    fn experiment_metrics_sql(
        &self,
        base: &ExperimentBaseParams,
        descriptors: &[MetricDescriptor],
        denominators: &[FactMetric],
        units_table: Option<&str>,
    ) -> Result<String, CompileError> {
        let settings = &base.settings;
        let uid = ident(settings.user_id_type())?;
        let table = shared_fact_table(&base.fact_tables, descriptors, uid)?;
        let dims = ProcessedDimensions::process(&base.dimensions, settings);

        let mut ctes = CteBuilder::new();
        self.push_units_source(&mut ctes, base, &dims, units_table)?;
        self.push_distinct_users(&mut ctes, settings, &dims, uid, descriptors)?;
        let population = self.push_denominator_filters(&mut ctes, base, uid, denominators)?;

        let (from, to) = metric_range(descriptors);
        ctes.push("__factTable", self.fact_table_cte(table, uid, descriptors, from, to)?);

        let mut columns = vec![
            "d.variation AS variation".to_string(),
            "d.dimension AS dimension".to_string(),
            format!("d.{uid} AS {uid}"),
        ];
        for m in descriptors {
            let window = self.window_condition(m, "d.timestamp");
            columns.push(windowed(&window, &m.col("value")));
            if m.ratio {
                columns.push(windowed(&window, &m.col("denominator")));
            }
            if m.regression_adjusted {
                let covariate = self.covariate_condition(m, "d.timestamp");
                columns.push(format!(
                    "CASE WHEN {covariate} THEN f.{} ELSE NULL END AS {}",
                    m.col("value"),
                    m.col("covariate")
                ));
            }
        }
        ctes.push(
            "__userFactJoin",
            format!(
                "SELECT\n  {}\nFROM {population} d\nLEFT JOIN __factTable f ON f.{uid} = d.{uid}",
                columns.join(",\n  ")
            ),
        );

        let mut aggregates = vec![
            "umj.variation AS variation".to_string(),
            "umj.dimension AS dimension".to_string(),
            format!("umj.{uid} AS {uid}"),
        ];
        for m in descriptors {
            let metric = &m.metric;
            aggregates.push(format!(
                "{} AS {}",
                unit_rollup(metric, &metric.numerator, &format!("umj.{}", m.col("value"))),
                m.col("value")
            ));
            if let (true, Some(denominator)) = (m.ratio, &metric.denominator) {
                aggregates.push(format!(
                    "{} AS {}",
                    unit_rollup(metric, denominator, &format!("umj.{}", m.col("denominator"))),
                    m.col("denominator")
                ));
            }
            if m.regression_adjusted {
                aggregates.push(format!(
                    "{} AS {}",
                    unit_rollup(metric, &metric.numerator, &format!("umj.{}", m.col("covariate"))),
                    m.col("covariate")
                ));
            }
        }
        ctes.push(
            "__userMetricAgg",
            format!(
                "SELECT\n  {}\nFROM __userFactJoin umj\nGROUP BY umj.variation, umj.dimension, umj.{uid}",
                aggregates.join(",\n  ")
            ),
        );

        let select = self.push_statistics(&mut ctes, descriptors, Some("__userFactJoin"))?;
        Ok(ctes.finish(&select))
    }

    /// `__distinctUsers`: analysable units with their slice value and the
    /// timestamp metric windows start from.
    pub(crate) fn push_distinct_users(
        &self,
        ctes: &mut CteBuilder,
        settings: &SnapshotSettings,
        dims: &ProcessedDimensions,
        uid: &str,
        descriptors: &[MetricDescriptor],
    ) -> Result<(), CompileError> {
        let d = self.dialect;
        let activation_filter = settings.activation_metric.is_some() && !dims.activation_dimension;
        let timestamp = if activation_filter {
            "u.first_activation_timestamp"
        } else {
            "u.first_exposure_timestamp"
        };

        let mut conditions = vec![format!(
            "u.variation <> {}",
            d.string_literal(MULTIPLE_EXPOSURES_VARIATION)
        )];
        if activation_filter {
            conditions.push("u.first_activation_timestamp IS NOT NULL".to_string());
        }
        if settings.skip_partial_data {
            let cutoff = descriptors.iter().map(|m| m.last_complete_exposure).min();
            if let Some(cutoff) = cutoff.filter(|c| *c < settings.end_date) {
                conditions.push(format!(
                    "u.first_exposure_timestamp <= {}",
                    d.timestamp_literal(cutoff)
                ));
            }
        }

        ctes.push(
            "__distinctUsers",
            format!(
                "SELECT\n  u.{uid} AS {uid},\n  u.variation AS variation,\n  {} AS dimension,\n  {timestamp} AS timestamp\nFROM __experimentUnits u\nWHERE {}",
                self.dimension_expr(dims.slice.as_ref())?,
                conditions.join("\n  AND ")
            ),
        );
        Ok(())
    }

    /// Restrict the population to units converting on every denominator
    /// metric. Returns the name of the population CTE.
    fn push_denominator_filters(
        &self,
        ctes: &mut CteBuilder,
        base: &ExperimentBaseParams,
        uid: &str,
        denominators: &[FactMetric],
    ) -> Result<&'static str, CompileError> {
        if denominators.is_empty() {
            return Ok("__distinctUsers");
        }
        let mut filters = Vec::with_capacity(denominators.len());
        for (i, metric) in denominators.iter().enumerate() {
            validate_metric(metric)?;
            let table = fact_table_for(&base.fact_tables, metric, uid)?;
            let descriptor = MetricDescriptor::build(metric, "", &base.settings)?;
            let value = guarded(
                column_value(&metric.numerator, true)?,
                &metric.numerator.filters,
            );
            let name = format!("__denominator{i}");
            ctes.push(
                name.as_str(),
                format!(
                    "SELECT DISTINCT d.{uid} AS {uid}\nFROM __distinctUsers d\nJOIN (\nSELECT\n  f.{uid} AS {uid},\n  f.timestamp AS timestamp,\n  {value} AS value\nFROM (\n{}\n) f\n) f ON f.{uid} = d.{uid}\nWHERE f.value IS NOT NULL\n  AND {}",
                    subquery_sql(&table.sql),
                    self.window_condition(&descriptor, "d.timestamp"),
                ),
            );
            filters.push(format!("d.{uid} IN (SELECT {name}.{uid} FROM {name})"));
        }
        ctes.push(
            "__filteredUsers",
            format!(
                "SELECT d.*\nFROM __distinctUsers d\nWHERE {}",
                filters.join("\n  AND ")
            ),
        );
        Ok("__filteredUsers")
    }

    /// `__factTable`: fact rows in `[from, to]` with one filtered value
    /// column per metric (and denominator for ratios).
    pub(crate) fn fact_table_cte(
        &self,
        table: &FactTable,
        uid: &str,
        descriptors: &[MetricDescriptor],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, CompileError> {
        let d = self.dialect;
        let mut columns = vec![
            format!("f.{uid} AS {uid}"),
            "f.timestamp AS timestamp".to_string(),
        ];
        for m in descriptors {
            let metric = &m.metric;
            let proportion = matches!(metric.kind, MetricKind::Proportion);
            columns.push(format!(
                "{} AS {}",
                guarded(column_value(&metric.numerator, proportion)?, &metric.numerator.filters),
                m.col("value")
            ));
            if let (true, Some(denominator)) = (m.ratio, &metric.denominator) {
                columns.push(format!(
                    "{} AS {}",
                    guarded(column_value(denominator, false)?, &denominator.filters),
                    m.col("denominator")
                ));
            }
        }
        Ok(format!(
            "SELECT\n  {}\nFROM (\n{}\n) f\nWHERE f.timestamp >= {}\n  AND f.timestamp <= {}",
            columns.join(",\n  "),
            subquery_sql(&table.sql),
            d.timestamp_literal(from),
            d.timestamp_literal(to),
        ))
    }

    /// Predicate keeping fact rows (`f`) inside the metric window of a unit
    /// whose window anchor is `unit_ts`.
    pub(crate) fn window_condition(&self, m: &MetricDescriptor, unit_ts: &str) -> String {
        let d = self.dialect;
        let window = m.metric.window;
        let mut parts = vec![format!(
            "f.timestamp >= {}",
            d.add_hours(unit_ts, window.delay_hours)
        )];
        match window.kind {
            WindowKind::Conversion => parts.push(format!(
                "f.timestamp <= {}",
                d.add_hours(unit_ts, window.delay_hours + i64::from(window.window_hours))
            )),
            WindowKind::Lookback => {
                if let Some(start) = m.lookback_start {
                    parts.push(format!("f.timestamp >= {}", d.timestamp_literal(start)));
                }
            }
            WindowKind::None => {}
        }
        parts.push(format!("f.timestamp <= {}", d.timestamp_literal(m.metric_end)));
        parts.join(" AND ")
    }

    /// Predicate keeping fact rows in the regression-adjustment window
    /// preceding `unit_ts`.
    pub(crate) fn covariate_condition(&self, m: &MetricDescriptor, unit_ts: &str) -> String {
        format!(
            "f.timestamp >= {} AND f.timestamp < {unit_ts}",
            self.dialect.add_hours(unit_ts, -m.regression_adjustment_hours)
        )
    }

    /// Capping, quantile and aggregate CTEs over `__userMetricAgg`.
    /// Returns the final SELECT.
    ///
    /// `event_source` is the row-per-event CTE used by event-level quantiles;
    /// without it such metrics are rejected.
    pub(crate) fn push_statistics(
        &self,
        ctes: &mut CteBuilder,
        descriptors: &[MetricDescriptor],
        event_source: Option<&str>,
    ) -> Result<String, CompileError> {
        let d = self.dialect;

        let mut cap_columns = Vec::new();
        for m in descriptors {
            if let Capping::Percentile {
                percentile,
                ignore_zeros,
            } = m.metric.capping
            {
                cap_columns.push(format!(
                    "{} AS {}",
                    d.percentile(&non_zero(&format!("m.{}", m.col("value")), ignore_zeros), percentile),
                    m.col("value_cap")
                ));
                if m.ratio {
                    cap_columns.push(format!(
                        "{} AS {}",
                        d.percentile(
                            &non_zero(&format!("m.{}", m.col("denominator")), ignore_zeros),
                            percentile
                        ),
                        m.col("denominator_cap")
                    ));
                }
            }
        }
        let capped = !cap_columns.is_empty();
        if capped {
            ctes.push(
                "__capValue",
                format!("SELECT\n  {}\nFROM __userMetricAgg m", cap_columns.join(",\n  ")),
            );
        }

        let mut quantile_joins = Vec::new();
        let mut quantile_columns = Vec::new();
        for (i, m) in descriptors.iter().enumerate() {
            let Some(settings) = m.quantile else {
                continue;
            };
            let value = m.col("value");
            let zero_filter = if settings.ignore_zeros {
                format!(" AND src.{value} <> 0")
            } else {
                String::new()
            };
            let source_table = match settings.level {
                QuantileLevel::Unit => "__userMetricAgg",
                QuantileLevel::Event => event_source.ok_or_else(|| CompileError::UnsupportedMetric {
                    metric_id: m.metric.id.clone(),
                    context: "event-level quantiles over pre-aggregated rows".to_string(),
                })?,
            };
            let source = format!(
                "SELECT\n  src.variation AS variation,\n  src.dimension AS dimension,\n  src.{value} AS value\nFROM {source_table} src\nWHERE src.{value} IS NOT NULL{zero_filter}"
            );
            let name = format!("__quantile{i}");
            ctes.push(name.as_str(), quantile::grid_cte(d, &source, settings.quantile));
            let alias = format!("q{i}");
            quantile_columns.extend(quantile::select_columns(&alias, m));
            quantile_joins.push(format!(
                "LEFT JOIN {name} {alias} ON {alias}.variation = s.variation AND {alias}.dimension = s.dimension"
            ));
        }

        let mut stats = vec![
            "m.variation AS variation".to_string(),
            "m.dimension AS dimension".to_string(),
            "COUNT(*) AS users".to_string(),
            "COUNT(*) AS count".to_string(),
        ];
        for m in descriptors {
            let main = &m.cap_coalesce_metric;
            stats.push(format!("SUM({main}) AS {}", m.col("main_sum")));
            stats.push(format!("SUM(({main}) * ({main})) AS {}", m.col("main_sum_squares")));
            if m.ratio {
                let denominator = &m.cap_coalesce_denominator;
                stats.push(format!("SUM({denominator}) AS {}", m.col("denominator_sum")));
                stats.push(format!(
                    "SUM(({denominator}) * ({denominator})) AS {}",
                    m.col("denominator_sum_squares")
                ));
                stats.push(format!(
                    "SUM(({main}) * ({denominator})) AS {}",
                    m.col("main_denominator_sum_product")
                ));
            }
            if m.regression_adjusted {
                let covariate = &m.cap_coalesce_covariate;
                stats.push(format!("SUM({covariate}) AS {}", m.col("covariate_sum")));
                stats.push(format!(
                    "SUM(({covariate}) * ({covariate})) AS {}",
                    m.col("covariate_sum_squares")
                ));
                stats.push(format!(
                    "SUM(({main}) * ({covariate})) AS {}",
                    m.col("main_covariate_sum_product")
                ));
            }
            match m.metric.capping {
                Capping::None => {}
                Capping::Absolute { value } => {
                    stats.push(format!(
                        "{} AS {}",
                        format_number(value),
                        m.col("main_cap_value")
                    ));
                }
                Capping::Percentile { .. } => {
                    stats.push(format!(
                        "MAX(cap.{}) AS {}",
                        m.col("value_cap"),
                        m.col("main_cap_value")
                    ));
                    if m.ratio {
                        stats.push(format!(
                            "MAX(cap.{}) AS {}",
                            m.col("denominator_cap"),
                            m.col("denominator_cap_value")
                        ));
                    }
                }
            }
        }
        let cross_join = if capped { "\nCROSS JOIN __capValue cap" } else { "" };
        ctes.push(
            "__stats",
            format!(
                "SELECT\n  {}\nFROM __userMetricAgg m{cross_join}\nGROUP BY m.variation, m.dimension",
                stats.join(",\n  ")
            ),
        );

        let mut select_columns = vec!["s.*".to_string()];
        select_columns.extend(quantile_columns);
        let joins: String = quantile_joins.iter().map(|j| format!("\n{j}")).collect();
        Ok(format!(
            "SELECT\n  {}\nFROM __stats s{joins}\nORDER BY s.variation, s.dimension",
            select_columns.join(",\n  ")
        ))
    }
}

/// ` AND (f1) AND (f2)` for a filter list, empty when there are none.
pub(crate) fn filter_clause(filters: &[String]) -> String {
    filters.iter().map(|f| format!("\n  AND ({f})")).collect()
}

/// `value` when every filter holds, NULL otherwise.
pub(crate) fn guarded(value: String, filters: &[String]) -> String {
    if filters.is_empty() {
        return value;
    }
    let condition = filters
        .iter()
        .map(|f| format!("({f})"))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("CASE WHEN {condition} THEN {value} ELSE NULL END")
}

/// The per-row value of a column on a fact row aliased `f`.
pub(crate) fn column_value(column: &ColumnRef, proportion: bool) -> Result<String, CompileError> {
    if proportion || column.is_special() {
        return Ok("1".to_string());
    }
    Ok(format!("f.{}", ident(&column.column)?))
}

/// Roll per-row values of `column` up to one value per unit.
/// Units without rows get zero.
pub(crate) fn unit_rollup(metric: &FactMetric, column: &ColumnRef, expr: &str) -> String {
    if matches!(metric.kind, MetricKind::Proportion) || column.column == DISTINCT_USERS_COLUMN {
        return format!("COALESCE(MAX({expr}), 0)");
    }
    match column.aggregation {
        ColumnAggregation::Sum => format!("COALESCE(SUM({expr}), 0)"),
        ColumnAggregation::Max => format!("COALESCE(MAX({expr}), 0)"),
        ColumnAggregation::CountDistinct => format!("COUNT(DISTINCT {expr})"),
    }
}

/// Structural checks that do not depend on the dialect.
pub(crate) fn validate_metric(metric: &FactMetric) -> Result<(), CompileError> {
    let invalid = |message: &str| CompileError::InvalidMetric {
        metric_id: metric.id.clone(),
        message: message.to_string(),
    };
    if !metric.numerator.is_special() {
        ident(&metric.numerator.column)?;
    }
    match (&metric.kind, &metric.denominator) {
        (MetricKind::Ratio, None) => return Err(invalid("ratio metrics need a denominator")),
        (MetricKind::Ratio, Some(denominator)) => {
            if denominator.fact_table_id != metric.numerator.fact_table_id {
                return Err(CompileError::MixedFactTables {
                    first: metric.numerator.fact_table_id.clone(),
                    other: denominator.fact_table_id.clone(),
                });
            }
            if !denominator.is_special() {
                ident(&denominator.column)?;
            }
        }
        (MetricKind::Quantile(settings), _) => {
            if !(settings.quantile > 0.0 && settings.quantile < 1.0) {
                return Err(invalid("quantile must be between 0 and 1"));
            }
        }
        _ => {}
    }
    match metric.capping {
        Capping::Percentile { percentile, .. } if !(percentile > 0.0 && percentile < 1.0) => {
            Err(invalid("capping percentile must be between 0 and 1"))
        }
        Capping::Absolute { value } if !value.is_finite() => {
            Err(invalid("capping value must be finite"))
        }
        _ => Ok(()),
    }
}

/// Validate every metric and check they all read the same fact table.
pub(crate) fn shared_fact_table<'t>(
    fact_tables: &'t FactTableMap,
    descriptors: &[MetricDescriptor],
    uid: &str,
) -> Result<&'t FactTable, CompileError> {
    let first = descriptors.first().ok_or(CompileError::NoMetrics)?;
    for m in descriptors {
        validate_metric(&m.metric)?;
        if m.metric.fact_table_id() != first.metric.fact_table_id() {
            return Err(CompileError::MixedFactTables {
                first: first.metric.fact_table_id().to_string(),
                other: m.metric.fact_table_id().to_string(),
            });
        }
    }
    fact_table_for(fact_tables, &first.metric, uid)
}

/// Earliest start and latest end over a set of metrics.
pub(crate) fn metric_range(descriptors: &[MetricDescriptor]) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = descriptors.iter().map(|m| m.metric_start).min();
    let to = descriptors.iter().map(|m| m.metric_end).max();
    match (from, to) {
        (Some(from), Some(to)) => (from, to),
        _ => (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC),
    }
}

fn windowed(window: &str, column: &str) -> String {
    format!("CASE WHEN {window} THEN f.{column} ELSE NULL END AS {column}")
}

fn non_zero(expr: &str, ignore_zeros: bool) -> String {
    if ignore_zeros {
        format!("CASE WHEN {expr} <> 0 THEN {expr} ELSE NULL END")
    } else {
        expr.to_string()
    }
}
