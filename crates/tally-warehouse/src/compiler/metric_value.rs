//! Metric value over a date range, outside any experiment.

use tally_core::errors::CompileError;
use tally_core::model::{cap_coalesce, Capping, MetricKind, MetricValueParams, Segment};

use super::metrics::{column_value, guarded, unit_rollup, validate_metric};
use super::{fact_table_for, ident, subquery_sql, CteBuilder, SqlCompiler};

impl SqlCompiler<'_> {
    /// `{date, count, main_sum, main_sum_squares}`: one overall row with an
    /// empty date, plus one row per day of first event when
    /// `include_by_date` is set.
    pub fn metric_value(&self, params: &MetricValueParams) -> Result<String, CompileError> {
        let d = self.dialect;
        let metric = &params.metric;
        validate_metric(metric)?;
        if !matches!(metric.kind, MetricKind::Proportion | MetricKind::Mean) {
            return Err(CompileError::UnsupportedMetric {
                metric_id: metric.id.clone(),
                context: "metric value queries".to_string(),
            });
        }
        let uid = ident(&params.user_id_type)?;
        let table = fact_table_for(&params.fact_tables, metric, uid)?;

        let mut ctes = CteBuilder::new();
        let segment_filter = self.push_segment(&mut ctes, params.segment.as_ref(), uid, "f")?;
        let proportion = matches!(metric.kind, MetricKind::Proportion);
        ctes.push(
            "__factTable",
            format!(
                "SELECT\n  f.{uid} AS {uid},\n  f.timestamp AS timestamp,\n  {} AS value\nFROM (\n{}\n) f\nWHERE f.timestamp >= {}\n  AND f.timestamp <= {}{segment_filter}",
                guarded(column_value(&metric.numerator, proportion)?, &metric.numerator.filters),
                subquery_sql(&table.sql),
                d.timestamp_literal(params.from),
                d.timestamp_literal(params.to),
            ),
        );
        ctes.push(
            "__userMetric",
            format!(
                "SELECT\n  f.{uid} AS {uid},\n  {} AS value,\n  MIN(f.timestamp) AS first_timestamp\nFROM __factTable f\nGROUP BY f.{uid}",
                unit_rollup(metric, &metric.numerator, "f.value"),
            ),
        );

        let capped = matches!(metric.capping, Capping::Percentile { .. });
        if let Capping::Percentile {
            percentile,
            ignore_zeros,
        } = metric.capping
        {
            let value = if ignore_zeros {
                "CASE WHEN m.value <> 0 THEN m.value ELSE NULL END"
            } else {
                "m.value"
            };
            ctes.push(
                "__capValue",
                format!(
                    "SELECT {} AS value_cap\nFROM __userMetric m",
                    d.percentile(value, percentile)
                ),
            );
        }
        let value = cap_coalesce(metric.capping, "m.value", "cap.value_cap");
        let from = if capped {
            "__userMetric m\nCROSS JOIN __capValue cap"
        } else {
            "__userMetric m"
        };

        let mut arms = vec![format!(
            "SELECT\n  {} AS date,\n  COUNT(*) AS count,\n  SUM({value}) AS main_sum,\n  SUM(({value}) * ({value})) AS main_sum_squares\nFROM {from}",
            d.string_literal("")
        )];
        if params.include_by_date {
            let date = d.format_date("m.first_timestamp");
            arms.push(format!(
                "SELECT\n  {date} AS date,\n  COUNT(*) AS count,\n  SUM({value}) AS main_sum,\n  SUM(({value}) * ({value})) AS main_sum_squares\nFROM {from}\nGROUP BY {date}"
            ));
        }
        ctes.push("__metricValue", arms.join("\nUNION ALL\n"));
        Ok(ctes.finish(
            "SELECT\n  date,\n  count,\n  main_sum,\n  main_sum_squares\nFROM __metricValue\nORDER BY date",
        ))
    }

    /// Push a `__segment` CTE and return the filter restricting rows of
    /// `alias` to its units, or an empty string without a segment.
    pub(crate) fn push_segment(
        &self,
        ctes: &mut CteBuilder,
        segment: Option<&Segment>,
        uid: &str,
        alias: &str,
    ) -> Result<String, CompileError> {
        let Some(segment) = segment else {
            return Ok(String::new());
        };
        if segment.user_id_type != uid {
            return Err(CompileError::UnsupportedIdType {
                source_id: segment.id.clone(),
                id_type: uid.to_string(),
            });
        }
        ctes.push("__segment", subquery_sql(&segment.sql));
        Ok(format!(
            "\n  AND {alias}.{uid} IN (SELECT s.{uid} FROM __segment s)"
        ))
    }
}
