//! Warehouse connection configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Replacement for sensitive parameter values in serialized and debug output.
pub const REDACTED_VALUE: &str = "********";

/// Connection settings for the configured warehouse.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WarehouseConfig {
    /// SQL dialect name (`postgres`, `bigquery`, `sqlite`). Default: sqlite.
    pub dialect: Option<String>,
    /// Connector-specific connection parameters (path, host, project, ...).
    pub params: BTreeMap<String, String>,
    /// Schema that pipeline tables are created in.
    pub default_schema: Option<String>,
}

/// Connection parameters of `dialect` that hold credentials.
pub fn sensitive_param_keys(dialect: &str) -> &'static [&'static str] {
    match dialect.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => &["password", "ssl_key"],
        "bigquery" => &["private_key", "credentials_json"],
        _ => &[],
    }
}

impl WarehouseConfig {
    /// Returns the effective dialect name, defaulting to `sqlite`.
    pub fn effective_dialect(&self) -> &str {
        self.dialect.as_deref().unwrap_or("sqlite")
    }

    /// Look up a connection parameter, treating empty strings as absent.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// The default schema, treating an empty string as absent.
    pub fn effective_default_schema(&self) -> Option<&str> {
        self.default_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `table` qualified with the default schema when one is set.
    pub fn table_path(&self, table: &str) -> String {
        match self.effective_default_schema() {
            Some(schema) => format!("{schema}.{table}"),
            None => table.to_string(),
        }
    }

    pub fn sensitive_param_keys(&self) -> &'static [&'static str] {
        sensitive_param_keys(self.effective_dialect())
    }

    /// A copy whose sensitive parameters are replaced by [`REDACTED_VALUE`].
    pub fn redacted(&self) -> Self {
        let sensitive = self.sensitive_param_keys();
        let params = self
            .params
            .iter()
            .map(|(key, value)| {
                if sensitive.contains(&key.as_str()) {
                    (key.clone(), REDACTED_VALUE.to_string())
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect();
        Self {
            dialect: self.dialect.clone(),
            params,
            default_schema: self.default_schema.clone(),
        }
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("WarehouseConfig")
            .field("dialect", &redacted.dialect)
            .field("params", &redacted.params)
            .field("default_schema", &redacted.default_schema)
            .finish()
    }
}
