//! Incremental refresh pipeline.

pub mod grouping;
pub mod orchestrator;
pub mod stage;

pub use grouping::{group_metrics, lookback_date, pipeline_params, pipeline_table_name};
pub use orchestrator::{PipelineOrchestrator, PipelinePlan, PipelineRun, DROP_TABLES_STAGE};
pub use stage::{PipelineStage, PipelineState};
