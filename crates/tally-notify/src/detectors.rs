//! Trigger conditions. All comparisons are strict: a value exactly at the
//! threshold never fires.

/// A failed scheduled refresh.
pub fn auto_update_triggered(success: bool) -> bool {
    !success
}

/// Sample ratio mismatch: the SRM p-value is below `threshold`.
pub fn srm_triggered(srm: f64, threshold: f64) -> bool {
    srm < threshold
}

/// Share of units exposed to more than one variation.
/// `None` when there are no units at all.
pub fn multiple_exposures_percent(multiple_exposures: u64, total_users: u64) -> Option<f64> {
    if total_users == 0 {
        return None;
    }
    Some(multiple_exposures as f64 / total_users as f64)
}

/// The multiply-exposed share exceeds `threshold`.
pub fn multiple_exposures_triggered(percent: Option<f64>, threshold: f64) -> bool {
    percent.is_some_and(|p| threshold < p)
}
