//! Observability for Tally.
//! `tracing` crate with `EnvFilter`, per-subsystem log levels.

pub mod setup;

pub use setup::{init_tracing, DEFAULT_LOG_FILTER, LOG_ENV_VAR};
