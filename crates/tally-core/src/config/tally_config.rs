//! Top-level Tally configuration with layered resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{NotificationConfig, PipelineConfig, WarehouseConfig};
use crate::errors::ConfigError;

const PROJECT_CONFIG_FILE: &str = "tally.toml";

/// Top-level configuration aggregating all sub-configs.
///
/// Resolution order (highest priority first):
/// 1. CLI flags (applied via `apply_cli_overrides`)
/// 2. Environment variables (`TALLY_*`)
/// 3. Project config (`tally.toml` in project root)
/// 4. User config (`~/.tally/config.toml`)
/// 5. Compiled defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TallyConfig {
    pub warehouse: WarehouseConfig,
    pub pipeline: PipelineConfig,
    pub notifications: NotificationConfig,
}

/// CLI override arguments that can be applied to a config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dialect: Option<String>,
    pub default_schema: Option<String>,
    pub max_metrics_per_group: Option<usize>,
    pub lookback_buffer_hours: Option<u32>,
    pub srm_threshold: Option<f64>,
    pub multiple_exposure_min_percent: Option<f64>,
    pub environments: Option<Vec<String>>,
}

impl TallyConfig {
    /// Load configuration with layered resolution rooted at `root`.
    pub fn load(root: &Path, cli_overrides: Option<&CliOverrides>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(user_config_path) = user_config_path() {
            if user_config_path.exists() {
                match Self::merge_toml_file(&mut config, &user_config_path) {
                    Ok(()) => {}
                    Err(e @ ConfigError::ParseError { .. }) => return Err(e),
                    Err(e) => {
                        ::tracing::warn!(
                            path = %user_config_path.display(),
                            error = %e,
                            "ignoring unreadable user config"
                        );
                    }
                }
            }
        }

        let project_config_path = root.join(PROJECT_CONFIG_FILE);
        if project_config_path.exists() {
            Self::merge_toml_file(&mut config, &project_config_path)?;
        }

        Self::apply_env_overrides(&mut config);

        if let Some(cli) = cli_overrides {
            Self::apply_cli_overrides(&mut config, cli);
        }

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: "<string>".to_string(),
            message: e.to_string(),
        })?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate the configuration values.
    pub fn validate(config: &TallyConfig) -> Result<(), ConfigError> {
        if let Some(threshold) = config.notifications.srm_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ValidationFailed {
                    field: "notifications.srm_threshold".to_string(),
                    message: "must be between 0.0 and 1.0".to_string(),
                });
            }
        }
        if let Some(percent) = config.notifications.multiple_exposure_min_percent {
            if !(0.0..=1.0).contains(&percent) {
                return Err(ConfigError::ValidationFailed {
                    field: "notifications.multiple_exposure_min_percent".to_string(),
                    message: "must be between 0.0 and 1.0".to_string(),
                });
            }
        }
        if config.pipeline.max_metrics_per_group == Some(0) {
            return Err(ConfigError::ValidationFailed {
                field: "pipeline.max_metrics_per_group".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if let Some(schema) = config.warehouse.effective_default_schema() {
            let valid = schema.split('.').all(|part| {
                !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
            if !valid {
                return Err(ConfigError::ValidationFailed {
                    field: "warehouse.default_schema".to_string(),
                    message: "must be a dotted [A-Za-z0-9_] path".to_string(),
                });
            }
        }
        if let Some(prefix) = &config.pipeline.table_prefix {
            let valid = !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(ConfigError::ValidationFailed {
                    field: "pipeline.table_prefix".to_string(),
                    message: "must be a non-empty [A-Za-z0-9_] identifier".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merge a TOML file into the existing config.
    /// Unknown keys are silently ignored (forward-compatible).
    fn merge_toml_file(config: &mut TallyConfig, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let file_config: TallyConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        Self::merge(config, &file_config);
        Ok(())
    }

    /// Merge `other` into `base`; `other` wins wherever it sets a value.
    fn merge(base: &mut TallyConfig, other: &TallyConfig) {
        // Warehouse
        if other.warehouse.dialect.is_some() {
            base.warehouse.dialect = other.warehouse.dialect.clone();
        }
        for (key, value) in &other.warehouse.params {
            base.warehouse.params.insert(key.clone(), value.clone());
        }
        if other.warehouse.default_schema.is_some() {
            base.warehouse.default_schema = other.warehouse.default_schema.clone();
        }

        // Pipeline
        if other.pipeline.max_metrics_per_group.is_some() {
            base.pipeline.max_metrics_per_group = other.pipeline.max_metrics_per_group;
        }
        if other.pipeline.table_prefix.is_some() {
            base.pipeline.table_prefix = other.pipeline.table_prefix.clone();
        }
        if other.pipeline.lookback_buffer_hours.is_some() {
            base.pipeline.lookback_buffer_hours = other.pipeline.lookback_buffer_hours;
        }

        // Notifications
        if other.notifications.srm_threshold.is_some() {
            base.notifications.srm_threshold = other.notifications.srm_threshold;
        }
        if other.notifications.multiple_exposure_min_percent.is_some() {
            base.notifications.multiple_exposure_min_percent =
                other.notifications.multiple_exposure_min_percent;
        }
        if !other.notifications.environments.is_empty() {
            base.notifications.environments = other.notifications.environments.clone();
        }
    }

    /// Apply environment variable overrides.
    /// Pattern: `TALLY_WAREHOUSE_DIALECT`, `TALLY_SRM_THRESHOLD`, etc.
    /// `TALLY_NOTIFICATION_ENVIRONMENTS` is a comma-separated list.
    fn apply_env_overrides(config: &mut TallyConfig) {
        if let Ok(val) = std::env::var("TALLY_WAREHOUSE_DIALECT") {
            config.warehouse.dialect = Some(val);
        }
        if let Ok(val) = std::env::var("TALLY_WAREHOUSE_DEFAULT_SCHEMA") {
            config.warehouse.default_schema = Some(val);
        }
        if let Ok(val) = std::env::var("TALLY_PIPELINE_MAX_METRICS_PER_GROUP") {
            if let Ok(v) = val.parse::<usize>() {
                config.pipeline.max_metrics_per_group = Some(v);
            }
        }
        if let Ok(val) = std::env::var("TALLY_PIPELINE_TABLE_PREFIX") {
            config.pipeline.table_prefix = Some(val);
        }
        if let Ok(val) = std::env::var("TALLY_PIPELINE_LOOKBACK_BUFFER_HOURS") {
            if let Ok(v) = val.parse::<u32>() {
                config.pipeline.lookback_buffer_hours = Some(v);
            }
        }
        if let Ok(val) = std::env::var("TALLY_SRM_THRESHOLD") {
            if let Ok(v) = val.parse::<f64>() {
                config.notifications.srm_threshold = Some(v);
            }
        }
        if let Ok(val) = std::env::var("TALLY_MULTIPLE_EXPOSURE_MIN_PERCENT") {
            if let Ok(v) = val.parse::<f64>() {
                config.notifications.multiple_exposure_min_percent = Some(v);
            }
        }
        if let Ok(val) = std::env::var("TALLY_NOTIFICATION_ENVIRONMENTS") {
            config.notifications.environments = val
                .split(',')
                .map(str::trim)
                .filter(|env| !env.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Apply CLI overrides (highest priority).
    fn apply_cli_overrides(config: &mut TallyConfig, cli: &CliOverrides) {
        if let Some(ref v) = cli.dialect {
            config.warehouse.dialect = Some(v.clone());
        }
        if let Some(ref v) = cli.default_schema {
            config.warehouse.default_schema = Some(v.clone());
        }
        if let Some(v) = cli.max_metrics_per_group {
            config.pipeline.max_metrics_per_group = Some(v);
        }
        if let Some(v) = cli.lookback_buffer_hours {
            config.pipeline.lookback_buffer_hours = Some(v);
        }
        if let Some(v) = cli.srm_threshold {
            config.notifications.srm_threshold = Some(v);
        }
        if let Some(v) = cli.multiple_exposure_min_percent {
            config.notifications.multiple_exposure_min_percent = Some(v);
        }
        if let Some(ref v) = cli.environments {
            config.notifications.environments = v.clone();
        }
    }

    /// Serialize the config back to TOML, with sensitive warehouse
    /// parameters redacted.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let redacted = TallyConfig {
            warehouse: self.warehouse.redacted(),
            ..self.clone()
        };
        toml::to_string_pretty(&redacted).map_err(|e| ConfigError::ParseError {
            path: "<serialization>".to_string(),
            message: e.to_string(),
        })
    }
}

/// Returns the user config path: `~/.tally/config.toml`.
fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".tally").join("config.toml"))
}
