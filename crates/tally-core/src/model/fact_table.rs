//! Fact tables and column references.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Special column: one per fact row.
pub const COUNT_COLUMN: &str = "$$count";
/// Special column: 1 for every unit with at least one fact row.
pub const DISTINCT_USERS_COLUMN: &str = "$$distinctUsers";

/// A warehouse SELECT producing event-level rows.
///
/// The SQL must yield one column per identifier type, a `timestamp`
/// column, and the value columns referenced by metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactTable {
    pub id: String,
    pub name: String,
    pub sql: String,
    pub user_id_types: Vec<String>,
}

impl FactTable {
    pub fn supports_id_type(&self, id_type: &str) -> bool {
        self.user_id_types.iter().any(|t| t == id_type)
    }
}

/// Fact tables keyed by id.
pub type FactTableMap = FxHashMap<String, FactTable>;

/// Build a [`FactTableMap`] from a list of tables.
pub fn fact_table_map(tables: impl IntoIterator<Item = FactTable>) -> FactTableMap {
    tables.into_iter().map(|t| (t.id.clone(), t)).collect()
}

/// How a column is rolled up per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnAggregation {
    #[default]
    Sum,
    Max,
    CountDistinct,
}

/// A reference to a value column on a fact table, with row filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub fact_table_id: String,
    pub column: String,
    #[serde(default)]
    pub aggregation: ColumnAggregation,
    /// Raw SQL predicates over fact columns, AND-ed together.
    #[serde(default)]
    pub filters: Vec<String>,
}

impl ColumnRef {
    pub fn new(fact_table_id: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            fact_table_id: fact_table_id.into(),
            column: column.into(),
            aggregation: ColumnAggregation::Sum,
            filters: Vec::new(),
        }
    }

    pub fn count(fact_table_id: impl Into<String>) -> Self {
        Self::new(fact_table_id, COUNT_COLUMN)
    }

    pub fn distinct_users(fact_table_id: impl Into<String>) -> Self {
        Self::new(fact_table_id, DISTINCT_USERS_COLUMN)
    }

    pub fn with_aggregation(mut self, aggregation: ColumnAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn is_special(&self) -> bool {
        self.column == COUNT_COLUMN || self.column == DISTINCT_USERS_COLUMN
    }
}
