//! Optional connector capabilities.

use serde::{Deserialize, Serialize};
use tally_core::errors::WarehouseError;
use tally_core::model::{ColumnTopValuesParams, FactMetric, FactTable, TestQueryParams};

use super::job::{JobObserver, JsonRow, QueryResponse};
use super::rows::TopValueRow;
use super::WarehouseConnector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Lists tables and their columns.
pub trait SchemaInspector: Send + Sync {
    fn list_tables(&self) -> Result<Vec<TableInfo>, WarehouseError>;
}

/// Most frequent values of a fact table column.
pub trait TopValuesProvider: Send + Sync {
    fn column_top_values(
        &self,
        params: &ColumnTopValuesParams,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<TopValueRow>, WarehouseError>;
}

/// Proposes metrics from the events tracked in a fact table.
pub trait AutoMetricSource: Send + Sync {
    fn discover_metrics(&self, fact_table: &FactTable) -> Result<Vec<FactMetric>, WarehouseError>;
}

/// Runs user-written SQL with a row limit.
pub trait TestQueryRunner: Send + Sync {
    fn run_test_query(
        &self,
        params: &TestQueryParams,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<JsonRow>, WarehouseError>;
}

/// Cancels jobs by id from outside the call that submitted them.
pub trait QueryCanceller: Send + Sync {
    /// Returns whether a running job with this id was found.
    fn cancel_query(&self, job_id: &str) -> Result<bool, WarehouseError>;
}

bitflags::bitflags! {
    /// Set of optional capabilities a connector offers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Lists tables and columns.
        const SCHEMA_INSPECTION = 1;
        /// Most frequent values of a fact table column.
        const TOP_VALUES = 1 << 1;
        /// Proposes metrics from tracked events.
        const AUTO_METRICS = 1 << 2;
        /// Runs user SQL with a row limit.
        const TEST_QUERY = 1 << 3;
        /// Cancels running jobs by id.
        const CANCELLATION = 1 << 4;
        /// Pretty-prints SQL in its dialect.
        const FORMAT_DIALECT = 1 << 5;
    }
}

impl Capabilities {
    /// Capabilities exposed through a connector's optional accessors.
    pub fn detect<C: WarehouseConnector + ?Sized>(connector: &C) -> Self {
        let mut caps = Self::empty();
        caps.set(Self::SCHEMA_INSPECTION, connector.schema_inspector().is_some());
        caps.set(Self::TOP_VALUES, connector.top_values().is_some());
        caps.set(Self::AUTO_METRICS, connector.auto_metrics().is_some());
        caps.set(Self::TEST_QUERY, connector.test_query_runner().is_some());
        caps.set(Self::CANCELLATION, connector.canceller().is_some());
        caps.set(Self::FORMAT_DIALECT, connector.format_dialect().is_some());
        caps
    }

    /// Flag names of the contained capabilities, in declaration order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        self.iter_names().map(|(name, _)| name)
    }
}
