//! Configuration system for Tally.
//! TOML-based, layered resolution: CLI > env > project > user > defaults.

pub mod notification_config;
pub mod pipeline_config;
pub mod tally_config;
pub mod warehouse_config;

pub use notification_config::NotificationConfig;
pub use pipeline_config::PipelineConfig;
pub use tally_config::{CliOverrides, TallyConfig};
pub use warehouse_config::{sensitive_param_keys, WarehouseConfig, REDACTED_VALUE};
