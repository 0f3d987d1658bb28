//! Discovery and housekeeping queries: past experiments, dimension slices,
//! column top values, ad-hoc test queries and table cleanup.

use chrono::Duration;
use tally_core::errors::CompileError;
use tally_core::model::{
    ColumnTopValuesParams, DimensionSlicesParams, DropTableParams, PastExperimentParams,
    TestQueryParams, DEFAULT_TEST_QUERY_LIMIT, DEFAULT_TOP_VALUES_LIMIT, NULL_DIMENSION_VALUE,
};

use super::{ident, subquery_sql, table_path, CteBuilder, SqlCompiler};

impl SqlCompiler<'_> {
    /// Experiments with exposures after `from`, one row per variation with
    /// more than `min_users` distinct units.
    pub fn past_experiments(&self, params: &PastExperimentParams) -> Result<String, CompileError> {
        let d = self.dialect;
        if params.exposure_queries.is_empty() {
            return Err(CompileError::NoExposureQueries);
        }
        let mut ctes = CteBuilder::new();
        let mut arms = Vec::with_capacity(params.exposure_queries.len());
        for (i, query) in params.exposure_queries.iter().enumerate() {
            let uid = ident(&query.user_id_type)?;
            let name = format!("__exposures{i}");
            ctes.push(
                name.as_str(),
                format!(
                    "SELECT\n  {} AS exposure_query,\n  {} AS experiment_id,\n  {} AS variation_id,\n  {} AS unit_id,\n  e.timestamp AS timestamp\nFROM (\n{}\n) e\nWHERE e.timestamp > {}",
                    d.string_literal(&query.id),
                    d.cast_to_string("e.experiment_id"),
                    d.cast_to_string("e.variation_id"),
                    d.cast_to_string(&format!("e.{uid}")),
                    subquery_sql(&query.sql),
                    d.timestamp_literal(params.from),
                ),
            );
            arms.push(format!("SELECT * FROM {name}"));
        }
        ctes.push("__experiments", arms.join("\nUNION ALL\n"));
        ctes.push(
            "__variations",
            format!(
                "SELECT\n  x.exposure_query AS exposure_query,\n  x.experiment_id AS experiment_id,\n  x.variation_id AS variation_id,\n  {} AS start_date,\n  {} AS end_date,\n  COUNT(DISTINCT x.unit_id) AS users,\n  {} AS latest_data\nFROM __experiments x\nGROUP BY x.exposure_query, x.experiment_id, x.variation_id\nHAVING COUNT(DISTINCT x.unit_id) > {}",
                d.format_date("MIN(x.timestamp)"),
                d.format_date("MAX(x.timestamp)"),
                d.format_datetime("MAX(x.timestamp)"),
                params.effective_min_users(),
            ),
        );
        Ok(ctes.finish(
            "SELECT\n  exposure_query,\n  experiment_id,\n  variation_id,\n  start_date,\n  end_date,\n  users,\n  latest_data\nFROM __variations\nORDER BY exposure_query, experiment_id, variation_id",
        ))
    }

    /// Distinct units per value of each experiment dimension over the last
    /// `lookback_days` before `as_of`.
    pub fn dimension_slices(&self, params: &DimensionSlicesParams) -> Result<String, CompileError> {
        let d = self.dialect;
        if params.dimensions.is_empty() {
            return Err(CompileError::NoDimensions);
        }
        let uid = ident(&params.exposure_query.user_id_type)?;
        let from = Duration::try_days(i64::from(params.lookback_days))
            .and_then(|days| params.as_of.checked_sub_signed(days))
            .ok_or_else(|| {
                CompileError::DateOutOfRange(format!(
                    "{} days before {}",
                    params.lookback_days, params.as_of
                ))
            })?;

        let mut ctes = CteBuilder::new();
        ctes.push("__rawExperiment", subquery_sql(&params.exposure_query.sql));
        let mut arms = Vec::with_capacity(params.dimensions.len());
        for dim in &params.dimensions {
            let column = ident(&dim.id)?;
            let value = format!(
                "COALESCE({}, {})",
                d.cast_to_string(&format!("e.{column}")),
                d.string_literal(NULL_DIMENSION_VALUE)
            );
            arms.push(format!(
                "SELECT\n  {value} AS dimension_value,\n  {} AS dimension_name,\n  COUNT(DISTINCT e.{uid}) AS units\nFROM __rawExperiment e\nWHERE e.timestamp >= {}\n  AND e.timestamp <= {}\nGROUP BY {value}",
                d.string_literal(&format!("dim_exp_{column}")),
                d.timestamp_literal(from),
                d.timestamp_literal(params.as_of),
            ));
        }
        ctes.push("__dimensionValues", arms.join("\nUNION ALL\n"));
        Ok(ctes.finish(
            "SELECT\n  dv.dimension_value AS dimension_value,\n  dv.dimension_name AS dimension_name,\n  dv.units AS units,\n  SUM(dv.units) OVER (PARTITION BY dv.dimension_name) AS total_units\nFROM __dimensionValues dv\nORDER BY dv.dimension_name, dv.units DESC, dv.dimension_value",
        ))
    }

    /// Most frequent values of a fact table column.
    pub fn column_top_values(&self, params: &ColumnTopValuesParams) -> Result<String, CompileError> {
        let d = self.dialect;
        let column = ident(&params.column)?;
        let select = format!(
            "SELECT\n  {} AS value,\n  COUNT(*) AS count\nFROM (\n{}\n) f\nWHERE f.{column} IS NOT NULL\nGROUP BY {}\nORDER BY count DESC, value",
            d.cast_to_string(&format!("f.{column}")),
            subquery_sql(&params.fact_table.sql),
            d.cast_to_string(&format!("f.{column}")),
        );
        Ok(d.select_limit(&select, params.limit.unwrap_or(DEFAULT_TOP_VALUES_LIMIT)))
    }

    /// Wrap an arbitrary query so it returns at most `limit` rows.
    pub fn test_query(&self, params: &TestQueryParams) -> Result<String, CompileError> {
        let select = format!(
            "SELECT *\nFROM (\n{}\n) tally_test",
            subquery_sql(&params.query)
        );
        Ok(self
            .dialect
            .select_limit(&select, params.limit.unwrap_or(DEFAULT_TEST_QUERY_LIMIT)))
    }

    pub fn drop_table(&self, params: &DropTableParams) -> Result<String, CompileError> {
        Ok(self.dialect.drop_table(table_path(&params.full_table_path)?))
    }
}
