//! Query compilation errors.

use super::error_code::{self, TallyErrorCode};

/// Errors raised while turning descriptors into SQL.
/// Compilation is pure, so these always indicate a malformed descriptor bundle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("Unknown fact table: {fact_table_id}")]
    UnknownFactTable { fact_table_id: String },

    #[error("Metrics in one query must share a fact table: {first} vs {other}")]
    MixedFactTables { first: String, other: String },

    #[error("Metric {metric_id} is invalid: {message}")]
    InvalidMetric { metric_id: String, message: String },

    #[error("Metric {metric_id} is not supported by {context}")]
    UnsupportedMetric { metric_id: String, context: String },

    #[error("{source_id} does not provide identifier type {id_type}")]
    UnsupportedIdType { source_id: String, id_type: String },

    #[error("Query requires at least one metric")]
    NoMetrics,

    #[error("Query requires at least one exposure query")]
    NoExposureQueries,

    #[error("Query requires at least one dimension")]
    NoDimensions,

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Date out of the supported range: {0}")]
    DateOutOfRange(String),
}

impl TallyErrorCode for CompileError {
    fn error_code(&self) -> &'static str {
        error_code::COMPILE_ERROR
    }
}
