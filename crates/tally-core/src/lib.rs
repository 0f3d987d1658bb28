//! # tally-core
//!
//! Foundation crate for the Tally experiment warehouse layer.
//! Defines descriptors, errors, config, alert events, and tracing setup.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod errors;
pub mod events;
pub mod model;
pub mod tracing;
pub mod traits;

pub use config::TallyConfig;
pub use errors::TallyErrorCode;
pub use events::{AlertEvent, AlertPayload, EventSink, NotificationType};
