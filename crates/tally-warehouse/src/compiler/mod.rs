//! Query compiler.
//!
//! One pure function per query kind: descriptor bundle in, SQL text out.
//! No clock, no randomness, no hidden state. Every date in the output comes
//! from the params.

mod discovery;
mod metric_analysis;
mod metric_value;
mod metrics;
mod pipeline;
pub mod quantile;
mod units;

pub use pipeline::{
    metrics_table_name, VALUE_KIND_COVARIATE, VALUE_KIND_DENOMINATOR, VALUE_KIND_MAIN,
};

use tally_core::errors::CompileError;
use tally_core::model::{FactMetric, FactTable, FactTableMap};

use crate::dialect::SqlDialect;

/// Compiles descriptor bundles into SQL for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler<'a> {
    dialect: &'a dyn SqlDialect,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }
}

/// Ordered list of common table expressions.
#[derive(Debug, Default)]
pub(crate) struct CteBuilder {
    ctes: Vec<(String, String)>,
}

impl CteBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.ctes.push((name.into(), body.into()));
    }

    /// Render `WITH ... <select>`. Without CTEs, returns `select` as is.
    pub(crate) fn finish(self, select: &str) -> String {
        if self.ctes.is_empty() {
            return select.to_string();
        }
        let ctes = self
            .ctes
            .iter()
            .map(|(name, body)| format!("{name} AS (\n{body}\n)"))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("WITH\n{ctes}\n{select}")
    }
}

/// Validate a plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn ident(name: &str) -> Result<&str, CompileError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(CompileError::InvalidIdentifier(name.to_string()))
    }
}

/// Validate a possibly qualified table path (`project.dataset.table`).
pub(crate) fn table_path(path: &str) -> Result<&str, CompileError> {
    let valid = !path.is_empty()
        && path.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(path)
    } else {
        Err(CompileError::InvalidIdentifier(path.to_string()))
    }
}

/// Strip trailing semicolons and whitespace from user-provided SQL so it
/// can be embedded as a subquery.
pub(crate) fn subquery_sql(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Resolve a metric's fact table and check it provides `id_type`.
pub(crate) fn fact_table_for<'t>(
    fact_tables: &'t FactTableMap,
    metric: &FactMetric,
    id_type: &str,
) -> Result<&'t FactTable, CompileError> {
    let table = fact_tables
        .get(metric.fact_table_id())
        .ok_or_else(|| CompileError::UnknownFactTable {
            fact_table_id: metric.fact_table_id().to_string(),
        })?;
    if !table.supports_id_type(id_type) {
        return Err(CompileError::UnsupportedIdType {
            source_id: table.id.clone(),
            id_type: id_type.to_string(),
        });
    }
    Ok(table)
}
