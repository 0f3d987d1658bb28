//! Descriptor model.
//! Immutable value types describing experiments, metrics, dimensions and
//! the per-kind query parameter bundles handed to the compiler.

pub mod dimension;
pub mod experiment;
pub mod fact_table;
pub mod metric;
pub mod params;

pub use dimension::{
    Dimension, ExperimentDimension, ProcessedDimensions, UserDimension, ALL_DIMENSION_VALUE,
    NULL_DIMENSION_VALUE, OTHER_DIMENSION_VALUE,
};
pub use experiment::{ExposureQuery, Segment, SnapshotSettings, MULTIPLE_EXPOSURES_VARIATION};
pub use fact_table::{
    fact_table_map, ColumnAggregation, ColumnRef, FactTable, FactTableMap, COUNT_COLUMN,
    DISTINCT_USERS_COLUMN,
};
pub use metric::{
    cap_coalesce, format_number, shift_hours, window_out_of_range, Capping, FactMetric,
    MetricDescriptor, MetricKind, MetricWindow, QuantileLevel, QuantileSettings,
    RegressionAdjustment, WindowKind,
};
pub use params::*;
