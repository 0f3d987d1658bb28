//! Alert event envelope and payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Event name of every experiment health alert.
pub const EXPERIMENT_WARNING_EVENT: &str = "experiment.warning";
/// Object kind of every experiment health alert.
pub const EXPERIMENT_OBJECT: &str = "experiment";

/// Alert types tracked in an experiment's notification ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    AutoUpdate,
    MultipleExposures,
    Srm,
}

impl NotificationType {
    pub const ALL: [Self; 3] = [Self::AutoUpdate, Self::MultipleExposures, Self::Srm];

    /// The ledger tag, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoUpdate => "auto-update",
            Self::MultipleExposures => "multiple-exposures",
            Self::Srm => "srm",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown notification type: {s}"))
    }
}

/// Type-specific alert body. Serialized with a `type` discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AlertPayload {
    #[serde(rename_all = "camelCase")]
    AutoUpdate {
        success: bool,
        experiment_id: String,
        experiment_name: String,
    },
    #[serde(rename_all = "camelCase")]
    MultipleExposures {
        experiment_id: String,
        experiment_name: String,
        users_count: u64,
        percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    Srm {
        experiment_id: String,
        experiment_name: String,
        threshold: f64,
    },
}

impl AlertPayload {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::AutoUpdate { .. } => NotificationType::AutoUpdate,
            Self::MultipleExposures { .. } => NotificationType::MultipleExposures,
            Self::Srm { .. } => NotificationType::Srm,
        }
    }

    pub fn experiment_id(&self) -> &str {
        match self {
            Self::AutoUpdate { experiment_id, .. }
            | Self::MultipleExposures { experiment_id, .. }
            | Self::Srm { experiment_id, .. } => experiment_id,
        }
    }
}

/// Who caused the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventUser {
    /// Background jobs (snapshot refreshes, schedulers).
    #[default]
    System,
    Dashboard {
        id: String,
        email: String,
        name: String,
    },
}

/// The envelope handed to the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub event: String,
    pub object: String,
    pub data: AlertPayload,
    pub user: EventUser,
    pub projects: Vec<String>,
    pub environments: Vec<String>,
    pub tags: Vec<String>,
    pub contains_secrets: bool,
}

impl AlertEvent {
    /// Wrap `data` in an `experiment.warning` envelope.
    /// A missing project is reported as `[""]`.
    pub fn experiment_warning(
        data: AlertPayload,
        user: EventUser,
        project: Option<&str>,
        environments: Vec<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            event: EXPERIMENT_WARNING_EVENT.to_string(),
            object: EXPERIMENT_OBJECT.to_string(),
            data,
            user,
            projects: vec![project.unwrap_or_default().to_string()],
            environments,
            tags,
            contains_secrets: false,
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        self.data.notification_type()
    }
}
