//! Error handling for Tally.
//! One error enum per subsystem, `thiserror` only, zero `anyhow`.

pub mod compile_error;
pub mod config_error;
pub mod error_code;
pub mod notification_error;
pub mod pipeline_error;
pub mod storage_error;
pub mod warehouse_error;

pub use compile_error::CompileError;
pub use config_error::ConfigError;
pub use error_code::TallyErrorCode;
pub use notification_error::NotificationError;
pub use pipeline_error::PipelineError;
pub use storage_error::StorageError;
pub use warehouse_error::WarehouseError;
