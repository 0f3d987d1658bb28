//! # tally-notify
//!
//! Experiment health alerts. Detectors turn analysis results into a
//! triggered flag; [`memoize`] turns flags into at most one alert per
//! anomaly episode, tracked in each experiment's [`NotificationLedger`].
//!
//! - [`engine`]: `notify_auto_update` and `notify_experiment_change`.
//! - [`store`]: the versioned experiment store and the event log, both
//!   backed by SQLite.

pub mod detectors;
pub mod dispatch;
pub mod engine;
pub mod experiment;
pub mod ledger;
pub mod memoize;
pub mod migrations;
pub mod store;

pub use engine::{Evaluation, NotificationEngine};
pub use experiment::{AnalysisResult, ExperimentRecord, SnapshotSummary, VariationResult};
pub use ledger::NotificationLedger;
pub use memoize::{memoize, MemoOutcome};
pub use store::{ExperimentStore, LedgerWrite, SqliteEventLog, SqliteExperimentStore};
