//! Organization-level notification settings.

use serde::{Deserialize, Serialize};

/// Default SRM p-value threshold below which an alert fires.
pub const DEFAULT_SRM_THRESHOLD: f64 = 0.001;

/// Default share of multiply-exposed units above which an alert fires.
pub const MINIMUM_MULTIPLE_EXPOSURES_PERCENT: f64 = 0.01;

/// Organization overrides for experiment health alerts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationConfig {
    /// SRM threshold override. Default: 0.001.
    pub srm_threshold: Option<f64>,
    /// Multiple-exposure threshold override. Default: 0.01.
    pub multiple_exposure_min_percent: Option<f64>,
    /// Environment ids attached to events of experiments included in SDK payloads.
    pub environments: Vec<String>,
}

impl NotificationConfig {
    /// Returns the effective SRM threshold, defaulting to 0.001.
    pub fn effective_srm_threshold(&self) -> f64 {
        self.srm_threshold.unwrap_or(DEFAULT_SRM_THRESHOLD)
    }

    /// Returns the effective multiple-exposure threshold, defaulting to 0.01.
    pub fn effective_multiple_exposure_min_percent(&self) -> f64 {
        self.multiple_exposure_min_percent
            .unwrap_or(MINIMUM_MULTIPLE_EXPOSURES_PERCENT)
    }
}
