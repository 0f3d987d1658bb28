//! TallyErrorCode trait for boundary consumers.

/// Stable, machine-readable error codes.
/// Every error enum implements this so callers outside the crate
/// (job runners, API layers) can branch without matching on messages.
pub trait TallyErrorCode {
    /// Returns the error code string (e.g., "QUERY_FAILED").
    fn error_code(&self) -> &'static str;

    /// Returns the formatted boundary string: `[ERROR_CODE] message`.
    fn coded_string(&self) -> String
    where
        Self: std::fmt::Display,
    {
        format!("[{}] {}", self.error_code(), self)
    }
}

pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const COMPILE_ERROR: &str = "COMPILE_ERROR";
pub const MISSING_DATASOURCE_PARAMS: &str = "MISSING_DATASOURCE_PARAMS";
pub const DATASOURCE_NOT_SUPPORTED: &str = "DATASOURCE_NOT_SUPPORTED";
pub const QUERY_FAILED: &str = "QUERY_FAILED";
pub const ROW_DECODE_FAILED: &str = "ROW_DECODE_FAILED";
pub const CANCELLED: &str = "CANCELLED";
pub const PIPELINE_STAGE_FAILED: &str = "PIPELINE_STAGE_FAILED";
pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
pub const MIGRATION_FAILED: &str = "MIGRATION_FAILED";
pub const EXPERIMENT_NOT_FOUND: &str = "EXPERIMENT_NOT_FOUND";
pub const EVENT_NOT_CREATED: &str = "EVENT_NOT_CREATED";
