//! Notification engine errors.

use super::error_code::{self, TallyErrorCode};
use super::StorageError;

/// Errors that fail a notification cycle.
/// None of them leave the ledger marked as handled.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Experiment not found: {experiment_id}")]
    ExperimentNotFound { experiment_id: String },

    #[error("Error while creating event for experiment {experiment_id}")]
    EventNotCreated { experiment_id: String },

    #[error("Event sink failed: {message}")]
    Sink { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TallyErrorCode for NotificationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ExperimentNotFound { .. } => error_code::EXPERIMENT_NOT_FOUND,
            Self::EventNotCreated { .. } | Self::Sink { .. } => error_code::EVENT_NOT_CREATED,
            Self::Storage(e) => e.error_code(),
        }
    }
}
