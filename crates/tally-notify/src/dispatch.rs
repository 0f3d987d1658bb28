//! Envelope construction and hand-off to the event sink.

use tally_core::config::NotificationConfig;
use tally_core::errors::NotificationError;
use tally_core::events::{AlertEvent, AlertPayload, EventSink, EventUser, NotificationType};

use crate::experiment::ExperimentRecord;

/// Payload for a given alert type. Every type has exactly one arm.
pub fn payload_for(
    kind: NotificationType,
    experiment: &ExperimentRecord,
    detail: PayloadDetail,
) -> AlertPayload {
    let experiment_id = experiment.id.clone();
    let experiment_name = experiment.name.clone();
    match kind {
        NotificationType::AutoUpdate => AlertPayload::AutoUpdate {
            success: detail.success,
            experiment_id,
            experiment_name,
        },
        NotificationType::MultipleExposures => AlertPayload::MultipleExposures {
            experiment_id,
            experiment_name,
            users_count: detail.users_count,
            percent: detail.percent,
        },
        NotificationType::Srm => AlertPayload::Srm {
            experiment_id,
            experiment_name,
            threshold: detail.threshold,
        },
    }
}

/// Type-specific values carried into a payload. Fields a type does not use
/// are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PayloadDetail {
    pub success: bool,
    pub users_count: u64,
    pub percent: f64,
    pub threshold: f64,
}

/// Wrap `data` in the `experiment.warning` envelope for `experiment`.
pub fn build_event(
    experiment: &ExperimentRecord,
    data: AlertPayload,
    user: &EventUser,
    config: &NotificationConfig,
) -> AlertEvent {
    let environments = if experiment.included_in_payload() {
        config.environments.clone()
    } else {
        Vec::new()
    };
    AlertEvent::experiment_warning(
        data,
        user.clone(),
        experiment.project.as_deref(),
        environments,
        experiment.tags.clone(),
    )
}

/// Hand `event` to `sink`. A sink that creates no event fails the dispatch.
pub fn dispatch_event(sink: &dyn EventSink, event: &AlertEvent) -> Result<String, NotificationError> {
    let experiment_id = event.data.experiment_id().to_string();
    match sink.create_event(event)? {
        Some(event_id) => {
            tracing::info!(
                experiment_id = %experiment_id,
                notification_type = %event.notification_type(),
                event_id = %event_id,
                "experiment warning dispatched"
            );
            Ok(event_id)
        }
        None => {
            tracing::error!(
                experiment_id = %experiment_id,
                notification_type = %event.notification_type(),
                "event sink created no event"
            );
            Err(NotificationError::EventNotCreated { experiment_id })
        }
    }
}
