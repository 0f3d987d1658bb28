//! Alert events emitted by the notification engine.

pub mod sink;
pub mod types;

pub use sink::EventSink;
pub use types::{AlertEvent, AlertPayload, EventUser, NotificationType};
