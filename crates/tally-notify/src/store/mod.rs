//! Persistence for experiments and alert events.

mod connection;
pub mod event_log;
pub mod experiments;

use tally_core::errors::StorageError;

use crate::experiment::ExperimentRecord;
use crate::ledger::NotificationLedger;

pub use event_log::{SqliteEventLog, StoredEvent};
pub use experiments::SqliteExperimentStore;

/// Result of a conditional ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    /// Written; the record now carries `version`.
    Written { version: u64 },
    /// The record changed since it was read. Nothing was written.
    /// `actual` is `None` when the record no longer exists.
    Conflict { expected: u64, actual: Option<u64> },
}

/// Experiment documents with optimistic concurrency on the ledger.
pub trait ExperimentStore: Send + Sync {
    fn get_experiment(&self, id: &str) -> Result<Option<ExperimentRecord>, StorageError>;

    /// Insert or replace a whole record, keeping its `version`.
    fn put_experiment(&self, experiment: &ExperimentRecord) -> Result<(), StorageError>;

    /// Replace `pastNotifications` if the stored version still equals
    /// `expected_version`. A successful write bumps the version by one.
    fn update_past_notifications(
        &self,
        id: &str,
        expected_version: u64,
        ledger: &NotificationLedger,
    ) -> Result<LedgerWrite, StorageError>;
}

impl<T: ExperimentStore + ?Sized> ExperimentStore for std::sync::Arc<T> {
    fn get_experiment(&self, id: &str) -> Result<Option<ExperimentRecord>, StorageError> {
        (**self).get_experiment(id)
    }

    fn put_experiment(&self, experiment: &ExperimentRecord) -> Result<(), StorageError> {
        (**self).put_experiment(experiment)
    }

    fn update_past_notifications(
        &self,
        id: &str,
        expected_version: u64,
        ledger: &NotificationLedger,
    ) -> Result<LedgerWrite, StorageError> {
        (**self).update_past_notifications(id, expected_version, ledger)
    }
}
