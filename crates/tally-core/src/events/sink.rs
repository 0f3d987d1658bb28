//! Event sink trait.

use super::types::AlertEvent;
use crate::errors::NotificationError;

/// Receives alert events. Delivery (email, webhooks, in-app) happens
/// behind this boundary.
pub trait EventSink: Send + Sync {
    /// Persist or enqueue `event`.
    ///
    /// Returns the created event id, or `None` when the sink accepted the
    /// call but produced no event. The caller treats `None` as a failure.
    fn create_event(&self, event: &AlertEvent) -> Result<Option<String>, NotificationError>;
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn create_event(&self, event: &AlertEvent) -> Result<Option<String>, NotificationError> {
        (**self).create_event(event)
    }
}
