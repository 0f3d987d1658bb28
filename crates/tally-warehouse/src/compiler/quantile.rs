//! Quantile confidence bounds.
//!
//! Bounds are order-statistic quantiles at `q ± z·sqrt(q(1-q)/n*)` for a
//! fixed grid of `n*` values. Each grid point gets its own pair of
//! percentile columns and the reported pair is picked from the observed `n`.

use tally_core::model::MetricDescriptor;

use crate::dialect::SqlDialect;

/// Normal quantile for a two-sided 95% interval.
pub const QUANTILE_Z: f64 = 1.96;

/// Sample sizes the bounds are precomputed for, ascending.
pub const NSTAR_GRID: [u64; 5] = [100, 1_000, 10_000, 100_000, 1_000_000];

/// Lower and upper quantile levels for target `q` at sample size `nstar`,
/// clamped to `[0, 1]`.
pub fn quantile_bounds(q: f64, nstar: u64) -> (f64, f64) {
    let spread = QUANTILE_Z * (q * (1.0 - q) / nstar as f64).sqrt();
    ((q - spread).max(0.0), (q + spread).min(1.0))
}

/// The grid point used for an observed sample size: the largest one not
/// above `n`, or the smallest when `n` is below the grid.
pub fn nstar_for(n: u64) -> u64 {
    NSTAR_GRID
        .iter()
        .rev()
        .copied()
        .find(|&nstar| n >= nstar)
        .unwrap_or(NSTAR_GRID[0])
}

/// Per variation and dimension: sample size, the quantile and every grid
/// bound. `source` yields `variation`, `dimension` and `value`.
pub(crate) fn grid_cte(dialect: &dyn SqlDialect, source: &str, q: f64) -> String {
    let mut columns = vec![
        "qs.variation AS variation".to_string(),
        "qs.dimension AS dimension".to_string(),
        "COUNT(qs.value) AS n".to_string(),
        format!("{} AS quantile", dialect.percentile("qs.value", q)),
    ];
    for (i, &nstar) in NSTAR_GRID.iter().enumerate() {
        let (lower, upper) = quantile_bounds(q, nstar);
        columns.push(format!("{} AS lower_{i}", dialect.percentile("qs.value", lower)));
        columns.push(format!("{} AS upper_{i}", dialect.percentile("qs.value", upper)));
    }
    format!(
        "SELECT\n  {}\nFROM (\n{source}\n) qs\nGROUP BY qs.variation, qs.dimension",
        columns.join(",\n  ")
    )
}

/// Final-select columns for a metric whose grid CTE is joined as `alias`.
pub(crate) fn select_columns(alias: &str, m: &MetricDescriptor) -> Vec<String> {
    let pick = |value: &dyn Fn(usize, u64) -> String| {
        let mut arms: Vec<String> = NSTAR_GRID
            .iter()
            .enumerate()
            .rev()
            .map(|(i, &nstar)| format!("WHEN {alias}.n >= {nstar} THEN {}", value(i, nstar)))
            .collect();
        arms.push(format!("ELSE {}", value(0, NSTAR_GRID[0])));
        format!("CASE {} END", arms.join(" "))
    };
    vec![
        format!("{alias}.quantile AS {}", m.col("quantile")),
        format!("COALESCE({alias}.n, 0) AS {}", m.col("quantile_n")),
        format!(
            "{} AS {}",
            pick(&|i, _| format!("{alias}.lower_{i}")),
            m.col("quantile_lower")
        ),
        format!(
            "{} AS {}",
            pick(&|i, _| format!("{alias}.upper_{i}")),
            m.col("quantile_upper")
        ),
        format!(
            "{} AS {}",
            pick(&|_, nstar| nstar.to_string()),
            m.col("quantile_nstar")
        ),
    ]
}
