//! Metric distribution analysis: overall and daily aggregates plus a
//! fixed-width histogram of per-unit values.

use tally_core::errors::CompileError;
use tally_core::model::{
    cap_coalesce, Capping, MetricAnalysisParams, MetricKind, MetricPopulation, HISTOGRAM_BINS,
};

use super::metrics::{column_value, guarded, unit_rollup, validate_metric};
use super::{fact_table_for, ident, subquery_sql, CteBuilder, SqlCompiler};

impl SqlCompiler<'_> {
    /// One `overall` row (empty date, with histogram) followed by one `date`
    /// row per day.
    pub fn metric_analysis(&self, params: &MetricAnalysisParams) -> Result<String, CompileError> {
        let d = self.dialect;
        let metric = &params.metric;
        let settings = &params.settings;
        validate_metric(metric)?;
        if metric.quantile_settings().is_some() {
            return Err(CompileError::UnsupportedMetric {
                metric_id: metric.id.clone(),
                context: "metric analysis".to_string(),
            });
        }
        let uid = ident(&settings.user_id_type)?;
        let table = fact_table_for(&params.fact_tables, metric, uid)?;
        let ratio = metric.is_ratio();
        let denominator = metric.denominator.as_ref().filter(|_| ratio);

        let mut ctes = CteBuilder::new();
        let population_filter = match &settings.population {
            MetricPopulation::FactTable => String::new(),
            MetricPopulation::Segment(segment) => {
                self.push_segment(&mut ctes, Some(segment), uid, "f")?
            }
            MetricPopulation::ExposureQuery(query) => {
                if query.user_id_type != uid {
                    return Err(CompileError::UnsupportedIdType {
                        source_id: query.id.clone(),
                        id_type: uid.to_string(),
                    });
                }
                ctes.push(
                    "__population",
                    format!(
                        "SELECT DISTINCT e.{uid} AS {uid}\nFROM (\n{}\n) e\nWHERE e.timestamp >= {}\n  AND e.timestamp <= {}",
                        subquery_sql(&query.sql),
                        d.timestamp_literal(settings.start_date),
                        d.timestamp_literal(settings.end_date),
                    ),
                );
                format!("\n  AND f.{uid} IN (SELECT p.{uid} FROM __population p)")
            }
        };

        let proportion = matches!(metric.kind, MetricKind::Proportion);
        let mut fact_columns = vec![
            format!("f.{uid} AS {uid}"),
            "f.timestamp AS timestamp".to_string(),
            format!(
                "{} AS value",
                guarded(column_value(&metric.numerator, proportion)?, &metric.numerator.filters)
            ),
        ];
        if let Some(denominator) = denominator {
            fact_columns.push(format!(
                "{} AS denominator",
                guarded(column_value(denominator, false)?, &denominator.filters)
            ));
        }
        ctes.push(
            "__factTable",
            format!(
                "SELECT\n  {}\nFROM (\n{}\n) f\nWHERE f.timestamp >= {}\n  AND f.timestamp <= {}{population_filter}",
                fact_columns.join(",\n  "),
                subquery_sql(&table.sql),
                d.timestamp_literal(settings.start_date),
                d.timestamp_literal(settings.end_date),
            ),
        );

        let mut rollups = vec![format!(
            "{} AS value",
            unit_rollup(metric, &metric.numerator, "f.value")
        )];
        if let Some(denominator) = denominator {
            rollups.push(format!(
                "{} AS denominator",
                unit_rollup(metric, denominator, "f.denominator")
            ));
        }
        let date = d.format_date("f.timestamp");
        ctes.push(
            "__userMetricDaily",
            format!(
                "SELECT\n  f.{uid} AS {uid},\n  {date} AS date,\n  {}\nFROM __factTable f\nGROUP BY f.{uid}, {date}",
                rollups.join(",\n  ")
            ),
        );
        ctes.push(
            "__userMetricOverall",
            format!(
                "SELECT\n  f.{uid} AS {uid},\n  {}\nFROM __factTable f\nGROUP BY f.{uid}",
                rollups.join(",\n  ")
            ),
        );

        let capped = !matches!(metric.capping, Capping::None);
        let percentile_capped = if let Capping::Percentile {
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
                    "SELECT {} AS value_cap\nFROM __userMetricOverall m",
                    d.percentile(value, percentile)
                ),
            );
            true
        } else {
            false
        };
        let cap_join = if percentile_capped {
            "\nCROSS JOIN __capValue cap"
        } else {
            ""
        };
        let value = cap_coalesce(metric.capping, "m.value", "cap.value_cap");

        let mut sums = vec![
            "COUNT(*) AS units".to_string(),
            format!("SUM({value}) AS main_sum"),
            format!("SUM(({value}) * ({value})) AS main_sum_squares"),
        ];
        let mut denominator_columns = Vec::new();
        if ratio {
            sums.push("SUM(m.denominator) AS denominator_sum".to_string());
            sums.push("SUM(m.denominator * m.denominator) AS denominator_sum_squares".to_string());
            sums.push(format!(
                "SUM(({value}) * m.denominator) AS main_denominator_sum_product"
            ));
            denominator_columns = vec![
                "denominator_sum",
                "denominator_sum_squares",
                "main_denominator_sum_product",
            ];
        }

        ctes.push(
            "__statisticsOverall",
            format!(
                "SELECT\n  {},\n  MIN({value}) AS value_min,\n  MAX({value}) AS value_max,\n  {} / {HISTOGRAM_BINS} AS bin_width\nFROM __userMetricOverall m{cap_join}",
                sums.join(",\n  "),
                d.ensure_float(&format!("MAX({value}) - MIN({value})")),
            ),
        );

        let bins: Vec<String> = (0..HISTOGRAM_BINS)
            .map(|i| {
                let condition = histogram_bin_condition(&value, i);
                format!("SUM(CASE WHEN {condition} THEN 1 ELSE 0 END) AS units_bin_{i}")
            })
            .collect();
        ctes.push(
            "__histogram",
            format!(
                "SELECT\n  {}\nFROM __userMetricOverall m\nCROSS JOIN __statisticsOverall s{cap_join}",
                bins.join(",\n  ")
            ),
        );

        ctes.push(
            "__statisticsDaily",
            format!(
                "SELECT\n  m.date AS date,\n  {}\nFROM __userMetricDaily m{cap_join}\nGROUP BY m.date",
                sums.join(",\n  ")
            ),
        );

        let capped = d.bool_literal(capped);
        let bin_names: Vec<String> = (0..HISTOGRAM_BINS).map(|i| format!("units_bin_{i}")).collect();
        let mut overall = vec![
            format!("{} AS date", d.string_literal("")),
            format!("{} AS data_type", d.string_literal("overall")),
            format!("{capped} AS capped"),
            "s.units AS units".to_string(),
            "s.main_sum AS main_sum".to_string(),
            "s.main_sum_squares AS main_sum_squares".to_string(),
        ];
        let mut daily = vec![
            "d.date AS date".to_string(),
            format!("{} AS data_type", d.string_literal("date")),
            format!("{capped} AS capped"),
            "d.units AS units".to_string(),
            "d.main_sum AS main_sum".to_string(),
            "d.main_sum_squares AS main_sum_squares".to_string(),
        ];
        for column in &denominator_columns {
            overall.push(format!("s.{column} AS {column}"));
            daily.push(format!("d.{column} AS {column}"));
        }
        for column in ["value_min", "value_max", "bin_width"] {
            overall.push(format!("s.{column} AS {column}"));
            daily.push(format!("NULL AS {column}"));
        }
        for column in &bin_names {
            overall.push(format!("h.{column} AS {column}"));
            daily.push(format!("NULL AS {column}"));
        }
        ctes.push(
            "__analysis",
            format!(
                "SELECT\n  {}\nFROM __statisticsOverall s\nCROSS JOIN __histogram h\nUNION ALL\nSELECT\n  {}\nFROM __statisticsDaily d",
                overall.join(",\n  "),
                daily.join(",\n  ")
            ),
        );
        Ok(ctes.finish("SELECT *\nFROM __analysis\nORDER BY date"))
    }
}

/// Range predicate for histogram bin `i` over `value`, relative to the
/// overall statistics row `s`. A zero bin width puts every unit in bin 0.
fn histogram_bin_condition(value: &str, i: usize) -> String {
    let lower = format!("s.value_min + s.bin_width * {i}");
    let upper = format!("s.value_min + s.bin_width * {}", i + 1);
    if i == 0 {
        format!("(s.bin_width = 0 OR {value} < {upper})")
    } else if i + 1 == HISTOGRAM_BINS {
        format!("{value} >= {lower} AND s.bin_width > 0")
    } else {
        format!("{value} >= {lower} AND {value} < {upper}")
    }
}
