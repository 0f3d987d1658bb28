//! Experiment units: who was exposed to which variation, and when.

use chrono::{DateTime, Utc};
use tally_core::errors::CompileError;
use tally_core::model::{
    shift_hours, window_out_of_range, Dimension, ExperimentAggregateUnitsParams,
    ExperimentBaseParams, ExperimentUnitsParams, ProcessedDimensions, WindowKind,
    ALL_DIMENSION_VALUE, MULTIPLE_EXPOSURES_VARIATION, NULL_DIMENSION_VALUE,
    OTHER_DIMENSION_VALUE,
};

use super::metrics::filter_clause;
use super::{fact_table_for, ident, subquery_sql, table_path, CteBuilder, SqlCompiler};

impl SqlCompiler<'_> {
    /// Units of an experiment. With `units_table_full_name` the result is
    /// materialized through `CREATE TABLE .. AS`.
    pub fn experiment_units(&self, params: &ExperimentUnitsParams) -> Result<String, CompileError> {
        let base = &params.base;
        let dims = ProcessedDimensions::process(&base.dimensions, &base.settings);
        let mut ctes = CteBuilder::new();
        self.push_units_ctes(&mut ctes, base, &dims, base.settings.start_date)?;
        let select = ctes.finish("SELECT * FROM __experimentUnits");
        match &params.units_table_full_name {
            Some(table) => Ok(self.dialect.create_table_as(table_path(table)?, &select)),
            None => Ok(select),
        }
    }

    /// Unit counts per variation, overall and per experiment dimension.
    /// Multiply-exposed units are kept under the `__multiple__` variation.
    pub fn experiment_aggregate_units(
        &self,
        params: &ExperimentAggregateUnitsParams,
    ) -> Result<String, CompileError> {
        let base = &params.base;
        let d = self.dialect;
        let dims = ProcessedDimensions::process(&base.dimensions, &base.settings);
        let mut ctes = CteBuilder::new();
        self.push_units_source(&mut ctes, base, &dims, params.units_table.as_deref())?;

        let mut arms = vec![format!(
            "SELECT\n  u.variation AS variation,\n  {} AS dimension_value,\n  {} AS dimension_name,\n  COUNT(*) AS units\nFROM __experimentUnits u\nGROUP BY u.variation",
            d.string_literal(ALL_DIMENSION_VALUE),
            d.string_literal(""),
        )];
        for dim in &dims.experiment_dimensions {
            let column = format!("dim_exp_{}", ident(&dim.id)?);
            arms.push(format!(
                "SELECT\n  u.variation AS variation,\n  COALESCE(u.{column}, {}) AS dimension_value,\n  {} AS dimension_name,\n  COUNT(*) AS units\nFROM __experimentUnits u\nGROUP BY u.variation, u.{column}",
                d.string_literal(NULL_DIMENSION_VALUE),
                d.string_literal(&column),
            ));
        }
        ctes.push("__unitCounts", arms.join("\nUNION ALL\n"));
        Ok(ctes.finish(
            "SELECT\n  variation,\n  dimension_value,\n  dimension_name,\n  units\nFROM __unitCounts\nORDER BY dimension_name, dimension_value, variation",
        ))
    }

    /// Either read units from a materialized table or compute them inline.
    /// Both leave a `__experimentUnits` CTE behind.
    pub(crate) fn push_units_source(
        &self,
        ctes: &mut CteBuilder,
        base: &ExperimentBaseParams,
        dims: &ProcessedDimensions,
        units_table: Option<&str>,
    ) -> Result<(), CompileError> {
        match units_table {
            Some(table) => {
                ctes.push("__experimentUnits", format!("SELECT * FROM {}", table_path(table)?));
                Ok(())
            }
            None => self.push_units_ctes(ctes, base, dims, base.settings.start_date),
        }
    }

    /// CTEs ending in `__experimentUnits`: one row per unit with its
    /// variation, first exposure, dimension columns and activation time.
    pub(crate) fn push_units_ctes(
        &self,
        ctes: &mut CteBuilder,
        base: &ExperimentBaseParams,
        dims: &ProcessedDimensions,
        exposure_start: DateTime<Utc>,
    ) -> Result<(), CompileError> {
        let d = self.dialect;
        let settings = &base.settings;
        let uid = ident(settings.user_id_type())?;

        ctes.push("__rawExperiment", subquery_sql(&settings.exposure_query.sql));

        let segment_filter = self.push_segment(ctes, base.segment.as_ref(), uid, "e")?;

        let mut exposure_columns = vec![
            format!("e.{uid} AS {uid}"),
            format!("{} AS variation", d.cast_to_string("e.variation_id")),
            "e.timestamp AS timestamp".to_string(),
        ];
        for dim in &dims.experiment_dimensions {
            let column = ident(&dim.id)?;
            exposure_columns.push(format!(
                "{} AS dim_exp_{column}",
                d.cast_to_string(&format!("e.{column}"))
            ));
        }
        ctes.push(
            "__experimentExposures",
            format!(
                "SELECT\n  {}\nFROM __rawExperiment e\nWHERE e.experiment_id = {}\n  AND e.timestamp >= {}\n  AND e.timestamp <= {}{segment_filter}",
                exposure_columns.join(",\n  "),
                d.string_literal(&settings.experiment_id),
                d.timestamp_literal(exposure_start),
                d.timestamp_literal(settings.end_date),
            ),
        );

        let mut unit_columns = vec![
            format!("e.{uid} AS {uid}"),
            format!(
                "CASE WHEN COUNT(DISTINCT e.variation) > 1 THEN {} ELSE MAX(e.variation) END AS variation",
                d.string_literal(MULTIPLE_EXPOSURES_VARIATION)
            ),
            "MIN(e.timestamp) AS first_exposure_timestamp".to_string(),
        ];
        for dim in &dims.experiment_dimensions {
            let column = format!("dim_exp_{}", ident(&dim.id)?);
            let value = format!("MIN(e.{column})");
            let expr = match &dim.specified_slices {
                Some(slices) if !slices.is_empty() => {
                    let list = slices
                        .iter()
                        .map(|s| d.string_literal(s))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "CASE WHEN {value} IN ({list}) THEN {value} ELSE {} END",
                        d.string_literal(OTHER_DIMENSION_VALUE)
                    )
                }
                _ => value,
            };
            unit_columns.push(format!("{expr} AS {column}"));
        }
        ctes.push(
            "__exposureUnits",
            format!(
                "SELECT\n  {}\nFROM __experimentExposures e\nGROUP BY e.{uid}",
                unit_columns.join(",\n  ")
            ),
        );

        let mut columns = vec![
            format!("u.{uid} AS {uid}"),
            "u.variation AS variation".to_string(),
            "u.first_exposure_timestamp AS first_exposure_timestamp".to_string(),
        ];
        for dim in &dims.experiment_dimensions {
            let column = format!("dim_exp_{}", ident(&dim.id)?);
            columns.push(format!("u.{column} AS {column}"));
        }

        let mut joins = Vec::new();
        for (i, dim) in dims.unit_dimensions.iter().enumerate() {
            let id = ident(&dim.id)?;
            let name = format!("__dimUnit{i}");
            ctes.push(
                name.as_str(),
                format!(
                    "SELECT\n  du.{uid} AS {uid},\n  MAX({}) AS value\nFROM (\n{}\n) du\nGROUP BY du.{uid}",
                    d.cast_to_string("du.value"),
                    subquery_sql(&dim.sql),
                ),
            );
            columns.push(format!("ud{i}.value AS dim_unit_{id}"));
            joins.push(format!("LEFT JOIN {name} ud{i} ON ud{i}.{uid} = u.{uid}"));
        }

        if let Some(metric) = &settings.activation_metric {
            let table = fact_table_for(&base.fact_tables, metric, uid)?;
            let window = metric.window;
            let out_of_range = || window_out_of_range(&metric.id);
            let window_end = match window.kind {
                WindowKind::Conversion => window
                    .delay_hours
                    .checked_add(i64::from(window.window_hours))
                    .ok_or_else(out_of_range)?,
                _ => 0,
            };
            let facts_from = shift_hours(exposure_start, window.delay_hours.min(0))
                .ok_or_else(out_of_range)?;
            let facts_to = shift_hours(settings.end_date, window_end.max(0))
                .ok_or_else(out_of_range)?;
            ctes.push(
                "__activationFacts",
                format!(
                    "SELECT\n  f.{uid} AS {uid},\n  f.timestamp AS timestamp\nFROM (\n{}\n) f\nWHERE f.timestamp >= {}\n  AND f.timestamp <= {}{}",
                    subquery_sql(&table.sql),
                    d.timestamp_literal(facts_from),
                    d.timestamp_literal(facts_to),
                    filter_clause(&metric.numerator.filters),
                ),
            );
            let mut conditions = vec![format!(
                "a.timestamp >= {}",
                d.add_hours("u.first_exposure_timestamp", window.delay_hours)
            )];
            if window.kind == WindowKind::Conversion {
                conditions.push(format!(
                    "a.timestamp <= {}",
                    d.add_hours("u.first_exposure_timestamp", window_end)
                ));
            }
            ctes.push(
                "__activatedUnits",
                format!(
                    "SELECT\n  u.{uid} AS {uid},\n  MIN(a.timestamp) AS first_activation_timestamp\nFROM __exposureUnits u\nJOIN __activationFacts a ON a.{uid} = u.{uid}\nWHERE {}\nGROUP BY u.{uid}",
                    conditions.join("\n  AND ")
                ),
            );
            columns.push("au.first_activation_timestamp AS first_activation_timestamp".to_string());
            joins.push(format!("LEFT JOIN __activatedUnits au ON au.{uid} = u.{uid}"));
        }

        let joins: String = joins.iter().map(|j| format!("\n{j}")).collect();
        ctes.push(
            "__experimentUnits",
            format!(
                "SELECT\n  {}\nFROM __exposureUnits u{joins}",
                columns.join(",\n  ")
            ),
        );
        Ok(())
    }

    /// Column names of `__experimentUnits`, in order, without activation.
    pub(crate) fn unit_column_names(
        &self,
        uid: &str,
        dims: &ProcessedDimensions,
    ) -> Result<Vec<String>, CompileError> {
        let mut names = vec![
            uid.to_string(),
            "variation".to_string(),
            "first_exposure_timestamp".to_string(),
        ];
        for dim in &dims.experiment_dimensions {
            names.push(format!("dim_exp_{}", ident(&dim.id)?));
        }
        for dim in &dims.unit_dimensions {
            names.push(format!("dim_unit_{}", ident(&dim.id)?));
        }
        Ok(names)
    }

    /// The `dimension` value of a unit row aliased `u`.
    pub(crate) fn dimension_expr(&self, slice: Option<&Dimension>) -> Result<String, CompileError> {
        let d = self.dialect;
        Ok(match slice {
            None => d.string_literal(ALL_DIMENSION_VALUE),
            Some(Dimension::User(dim)) => format!(
                "COALESCE(u.dim_unit_{}, {})",
                ident(&dim.id)?,
                d.string_literal(NULL_DIMENSION_VALUE)
            ),
            Some(Dimension::Experiment(dim)) => format!(
                "COALESCE(u.dim_exp_{}, {})",
                ident(&dim.id)?,
                d.string_literal(NULL_DIMENSION_VALUE)
            ),
            Some(Dimension::Date | Dimension::DateCumulative | Dimension::DateDaily) => {
                d.format_date("u.first_exposure_timestamp")
            }
            Some(Dimension::Activation) => format!(
                "CASE WHEN u.first_activation_timestamp IS NULL THEN {} ELSE {} END",
                d.string_literal("Not Activated"),
                d.string_literal("Activated")
            ),
        })
    }
}
