//! # tally-warehouse
//!
//! Turns experiment descriptors into warehouse SQL and runs it.
//!
//! - [`dialect`]: engine-specific SQL fragments.
//! - [`compiler`]: one pure function per query kind.
//! - [`connector`]: the connector contract, typed rows and the embedded
//!   SQLite warehouse.
//! - [`pipeline`]: the staged incremental refresh.

pub mod compiler;
pub mod connector;
pub mod dialect;
pub mod pipeline;

pub use compiler::SqlCompiler;
pub use connector::{connector_for_config, SqliteConnector, WarehouseConnector};
pub use dialect::{dialect_for_name, SqlDialect};
pub use pipeline::{PipelineOrchestrator, PipelineStage};
