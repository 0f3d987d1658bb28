//! The slice of experiment and snapshot state the engine reads.

use serde::{Deserialize, Serialize};

use crate::ledger::NotificationLedger;

/// An experiment as stored, with its notification ledger and the version
/// used for conditional writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub archived: bool,
    /// Whether any feature rule or visual change references the experiment.
    #[serde(default)]
    pub has_linked_changes: bool,
    #[serde(default)]
    pub past_notifications: NotificationLedger,
    #[serde(default)]
    pub version: u64,
}

impl ExperimentRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            project: None,
            tags: Vec::new(),
            archived: false,
            has_linked_changes: false,
            past_notifications: NotificationLedger::new(),
            version: 0,
        }
    }

    /// Whether the experiment is served in SDK payloads. Only those
    /// experiments carry environments on their events.
    pub fn included_in_payload(&self) -> bool {
        !self.archived && self.has_linked_changes
    }
}

/// Per-variation totals of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariationResult {
    pub users: u64,
}

/// The default analysis of a snapshot, across all units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// SRM p-value.
    pub srm: f64,
    pub variations: Vec<VariationResult>,
}

impl AnalysisResult {
    pub fn total_users(&self) -> u64 {
        self.variations.iter().map(|v| v.users).sum()
    }
}

/// A finished analysis snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub experiment_id: String,
    /// Units seen in more than one variation.
    pub multiple_exposures: u64,
    /// `None` when the snapshot produced no default analysis.
    #[serde(default)]
    pub default_analysis: Option<AnalysisResult>,
}
