//! Incremental pipeline errors.

use super::error_code::{self, TallyErrorCode};
use super::{CompileError, WarehouseError};

/// Errors that abort an incremental refresh run.
/// Stage names are the orchestrator's stage labels (e.g. `PopulateUnits`).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline stage {stage} failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: WarehouseError,
    },

    #[error("Invalid pipeline plan: {0}")]
    InvalidPlan(#[from] CompileError),

    #[error("Pipeline cancelled before stage {stage}")]
    Cancelled { stage: &'static str },
}

impl PipelineError {
    /// The stage the run stopped at, when known.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::StageFailed { stage, .. } | Self::Cancelled { stage } => Some(stage),
            Self::InvalidPlan(_) => None,
        }
    }
}

impl TallyErrorCode for PipelineError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::StageFailed { .. } => error_code::PIPELINE_STAGE_FAILED,
            Self::InvalidPlan(e) => e.error_code(),
            Self::Cancelled { .. } => error_code::CANCELLED,
        }
    }
}
