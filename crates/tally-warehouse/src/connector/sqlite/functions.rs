//! SQL functions registered on every embedded warehouse connection.

use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::Connection;

use crate::dialect::sqlite::PERCENTILE_FUNCTION;

/// Continuous percentile with linear interpolation between closest ranks.
/// `q` is clamped to `[0, 1]`. Returns `None` for an empty sample.
pub fn percentile_cont(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(values[lower] + (values[upper] - values[lower]) * fraction)
}

#[derive(Debug, Default)]
struct PercentileState {
    values: Vec<f64>,
    q: f64,
}

/// `tally_percentile(value, q)`: skips NULL values.
struct Percentile;

impl Aggregate<PercentileState, Option<f64>> for Percentile {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<PercentileState> {
        Ok(PercentileState::default())
    }

    fn step(&self, ctx: &mut Context<'_>, state: &mut PercentileState) -> rusqlite::Result<()> {
        state.q = ctx.get(1)?;
        if let Some(value) = ctx.get::<Option<f64>>(0)? {
            state.values.push(value);
        }
        Ok(())
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        state: Option<PercentileState>,
    ) -> rusqlite::Result<Option<f64>> {
        Ok(state.and_then(|mut s| percentile_cont(&mut s.values, s.q)))
    }
}

pub(crate) fn register(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_aggregate_function(
        PERCENTILE_FUNCTION,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        Percentile,
    )
}
