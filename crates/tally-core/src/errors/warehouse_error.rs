//! Warehouse connector errors.

use super::error_code::{self, TallyErrorCode};
use super::CompileError;

/// Errors surfaced by a warehouse connector.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Required connection parameters are absent. Recoverable by fixing config.
    #[error("Missing datasource params: {message}")]
    MissingDatasourceParams { message: String },

    /// A required capability is structurally unavailable on this warehouse.
    #[error("This data source is not supported yet.")]
    DataSourceNotSupported,

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Query failed: {message}")]
    QueryFailed { message: String },

    #[error("Failed to decode {kind} rows: {message}")]
    RowDecode { kind: &'static str, message: String },

    #[error("Query {job_id} was cancelled")]
    Cancelled { job_id: String },
}

impl WarehouseError {
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
        }
    }
}

impl TallyErrorCode for WarehouseError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingDatasourceParams { .. } => error_code::MISSING_DATASOURCE_PARAMS,
            Self::DataSourceNotSupported => error_code::DATASOURCE_NOT_SUPPORTED,
            Self::Compile(e) => e.error_code(),
            Self::QueryFailed { .. } => error_code::QUERY_FAILED,
            Self::RowDecode { .. } => error_code::ROW_DECODE_FAILED,
            Self::Cancelled { .. } => error_code::CANCELLED,
        }
    }
}
