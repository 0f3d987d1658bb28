//! Evaluation entry points.
//!
//! Each detector reads the experiment's ledger, memoizes its observation
//! and writes the ledger back conditionally on the version it read. A
//! conflicting write means another evaluation got there first: this one is
//! discarded and nothing is dispatched again.

use std::sync::Arc;

use tally_core::config::NotificationConfig;
use tally_core::errors::NotificationError;
use tally_core::events::{EventSink, EventUser, NotificationType};

use crate::detectors;
use crate::dispatch::{build_event, dispatch_event, payload_for, PayloadDetail};
use crate::experiment::{ExperimentRecord, SnapshotSummary};
use crate::memoize::{memoize, MemoOutcome};
use crate::store::{ExperimentStore, LedgerWrite};

/// Outcome of one detector on one experiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub kind: NotificationType,
    pub outcome: MemoOutcome,
    /// `None` when the ledger did not change.
    pub write: Option<LedgerWrite>,
}

impl Evaluation {
    pub fn conflicted(&self) -> bool {
        matches!(self.write, Some(LedgerWrite::Conflict { .. }))
    }
}

pub struct NotificationEngine {
    store: Arc<dyn ExperimentStore>,
    sink: Arc<dyn EventSink>,
    config: NotificationConfig,
    user: EventUser,
}

impl NotificationEngine {
    pub fn new(
        store: Arc<dyn ExperimentStore>,
        sink: Arc<dyn EventSink>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
            user: EventUser::System,
        }
    }

    /// Attribute dispatched events to `user`.
    pub fn with_user(mut self, user: EventUser) -> Self {
        self.user = user;
        self
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Record the result of a scheduled refresh.
    pub fn notify_auto_update(
        &self,
        experiment_id: &str,
        success: bool,
    ) -> Result<Evaluation, NotificationError> {
        let mut experiment = self.load(experiment_id)?;
        self.evaluate(
            &mut experiment,
            NotificationType::AutoUpdate,
            detectors::auto_update_triggered(success),
            PayloadDetail {
                success,
                ..PayloadDetail::default()
            },
        )
    }

    /// Run the health detectors against a finished snapshot: multiple
    /// exposures first, then SRM. Snapshots without a default analysis are
    /// skipped. Evaluation stops at the first ledger conflict.
    pub fn notify_experiment_change(
        &self,
        snapshot: &SnapshotSummary,
    ) -> Result<Vec<Evaluation>, NotificationError> {
        let mut experiment = self.load(&snapshot.experiment_id)?;
        let Some(results) = &snapshot.default_analysis else {
            tracing::debug!(
                experiment_id = %snapshot.experiment_id,
                "snapshot has no default analysis"
            );
            return Ok(Vec::new());
        };

        let mut evaluations = Vec::with_capacity(2);

        let threshold = self.config.effective_multiple_exposure_min_percent();
        let percent =
            detectors::multiple_exposures_percent(snapshot.multiple_exposures, results.total_users());
        let multiple_exposures = self.evaluate(
            &mut experiment,
            NotificationType::MultipleExposures,
            detectors::multiple_exposures_triggered(percent, threshold),
            PayloadDetail {
                users_count: snapshot.multiple_exposures,
                percent: percent.unwrap_or_default(),
                ..PayloadDetail::default()
            },
        )?;
        evaluations.push(multiple_exposures);
        if multiple_exposures.conflicted() {
            return Ok(evaluations);
        }

        let threshold = self.config.effective_srm_threshold();
        evaluations.push(self.evaluate(
            &mut experiment,
            NotificationType::Srm,
            detectors::srm_triggered(results.srm, threshold),
            PayloadDetail {
                threshold,
                ..PayloadDetail::default()
            },
        )?);
        Ok(evaluations)
    }

    fn load(&self, experiment_id: &str) -> Result<ExperimentRecord, NotificationError> {
        self.store
            .get_experiment(experiment_id)?
            .ok_or_else(|| NotificationError::ExperimentNotFound {
                experiment_id: experiment_id.to_string(),
            })
    }

    fn evaluate(
        &self,
        experiment: &mut ExperimentRecord,
        kind: NotificationType,
        triggered: bool,
        detail: PayloadDetail,
    ) -> Result<Evaluation, NotificationError> {
        let mut ledger = experiment.past_notifications.clone();
        let current: &ExperimentRecord = experiment;
        let outcome = memoize(&mut ledger, kind, triggered, || {
            let data = payload_for(kind, current, detail);
            let event = build_event(current, data, &self.user, &self.config);
            dispatch_event(self.sink.as_ref(), &event).map(|_| ())
        })?;
        if !outcome.changed_ledger() {
            return Ok(Evaluation {
                kind,
                outcome,
                write: None,
            });
        }

        let write = self
            .store
            .update_past_notifications(&experiment.id, experiment.version, &ledger)?;
        match write {
            LedgerWrite::Written { version } => {
                experiment.past_notifications = ledger;
                experiment.version = version;
                tracing::debug!(
                    experiment_id = %experiment.id,
                    notification_type = %kind,
                    ?outcome,
                    version,
                    "ledger updated"
                );
            }
            LedgerWrite::Conflict { expected, actual } => {
                tracing::warn!(
                    experiment_id = %experiment.id,
                    notification_type = %kind,
                    expected,
                    ?actual,
                    "ledger write conflict, discarding evaluation"
                );
            }
        }
        Ok(Evaluation {
            kind,
            outcome,
            write: Some(write),
        })
    }
}
