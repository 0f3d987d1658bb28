//! Warehouse connector contract.
//!
//! A connector pairs the pure compiler with an executor. Every required
//! query kind has a `get_*_query` (compile) and `run_*_query` (execute)
//! method; both are provided in terms of [`WarehouseConnector::dialect`] and
//! [`WarehouseConnector::submit`]. Optional capabilities are reached through
//! accessors that return `None` when absent.

pub mod capabilities;
pub mod job;
pub mod rows;
pub mod sqlite;

use tally_core::config::{sensitive_param_keys, WarehouseConfig};
use tally_core::errors::WarehouseError;
use tally_core::model::{
    DimensionSlicesParams, DropTableParams, ExperimentAggregateUnitsParams,
    ExperimentFactMetricsParams, ExperimentMetricParams, ExperimentUnitsParams, FactMetric,
    MetricAnalysisParams, MetricValueParams, PastExperimentParams, PipelineFactMetricsParams,
    PipelineTrimMetricsParams, PipelineUnitsParams,
};

use crate::compiler::SqlCompiler;
use crate::dialect::{dialect_for_name, SqlDialect};

pub use capabilities::{
    AutoMetricSource, Capabilities, ColumnInfo, QueryCanceller, SchemaInspector, TableInfo,
    TestQueryRunner, TopValuesProvider,
};
pub use job::{
    JobHandle, JobObserver, JsonRow, NoopObserver, QueryJob, QueryResponse, QueryStatistics,
    RawQueryResult,
};
pub use rows::{
    decode_rows, AggregateUnitsRow, DimensionSliceRow, ExperimentMetricRow, FactMetricsRow,
    MetricAnalysisRow, MetricValueRow, PastExperimentRow, TopValueRow,
};
pub use sqlite::SqliteConnector;

/// A warehouse that can compile and execute every required query kind.
pub trait WarehouseConnector: Send + Sync {
    /// Connector type name used in logs.
    fn name(&self) -> &str;

    fn dialect(&self) -> &dyn SqlDialect;

    /// Submit SQL. Returns once the warehouse accepted the job.
    fn submit(&self, sql: &str) -> Result<Box<dyn QueryJob + '_>, WarehouseError>;

    fn compiler(&self) -> SqlCompiler<'_> {
        SqlCompiler::new(self.dialect())
    }

    /// Whether the incremental pipeline can run against this warehouse.
    fn supports_pipeline(&self) -> bool {
        true
    }

    fn schema_inspector(&self) -> Option<&dyn SchemaInspector> {
        None
    }

    fn top_values(&self) -> Option<&dyn TopValuesProvider> {
        None
    }

    fn auto_metrics(&self) -> Option<&dyn AutoMetricSource> {
        None
    }

    fn test_query_runner(&self) -> Option<&dyn TestQueryRunner> {
        None
    }

    fn canceller(&self) -> Option<&dyn QueryCanceller> {
        None
    }

    /// Name of the formatter dialect for displaying generated SQL, when it
    /// differs from the execution dialect.
    fn format_dialect(&self) -> Option<&'static str> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::detect(self)
    }

    /// Connection parameters holding credentials, redacted whenever the
    /// configuration is displayed or saved.
    fn sensitive_param_keys(&self) -> &'static [&'static str] {
        sensitive_param_keys(self.dialect().name())
    }

    /// Round-trip a trivial query to check the warehouse is reachable.
    fn test_connection(&self) -> Result<(), WarehouseError> {
        let result = self.run_query("SELECT 1 AS ok", &NoopObserver)?;
        if result.rows.len() == 1 {
            tracing::info!(connector = self.name(), "connection test passed");
            Ok(())
        } else {
            Err(WarehouseError::query_failed(format!(
                "connection test returned {} rows instead of 1",
                result.rows.len()
            )))
        }
    }

    /// Submit `sql`, hand the job handle to `observer`, then wait for rows.
    fn run_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<RawQueryResult, WarehouseError> {
        let job = self.submit(sql)?;
        let handle = job.handle();
        tracing::debug!(connector = self.name(), job_id = handle.job_id(), "query accepted");
        observer.on_job_accepted(&handle);
        let result = job.wait();
        if let Err(e) = &result {
            tracing::warn!(job_id = handle.job_id(), error = %e, "query failed");
        }
        result
    }

    fn get_experiment_units_query(
        &self,
        params: &ExperimentUnitsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().experiment_units(params)?)
    }

    /// Rows when the units were selected, none when materialized.
    fn run_experiment_units_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<JsonRow>, WarehouseError> {
        decode_rows("experiment units", self.run_query(sql, observer)?)
    }

    fn get_experiment_metric_query(
        &self,
        params: &ExperimentMetricParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().experiment_metric(params)?)
    }

    fn run_experiment_metric_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<ExperimentMetricRow>, WarehouseError> {
        decode_rows("experiment metric", self.run_query(sql, observer)?)
    }

    fn get_experiment_fact_metrics_query(
        &self,
        params: &ExperimentFactMetricsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().experiment_fact_metrics(params)?)
    }

    fn run_experiment_fact_metrics_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<FactMetricsRow>, WarehouseError> {
        decode_rows("experiment fact metrics", self.run_query(sql, observer)?)
    }

    fn get_experiment_aggregate_units_query(
        &self,
        params: &ExperimentAggregateUnitsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().experiment_aggregate_units(params)?)
    }

    fn run_experiment_aggregate_units_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<AggregateUnitsRow>, WarehouseError> {
        decode_rows("aggregate units", self.run_query(sql, observer)?)
    }

    fn get_metric_value_query(&self, params: &MetricValueParams) -> Result<String, WarehouseError> {
        Ok(self.compiler().metric_value(params)?)
    }

    fn run_metric_value_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<MetricValueRow>, WarehouseError> {
        decode_rows("metric value", self.run_query(sql, observer)?)
    }

    fn get_metric_analysis_query(
        &self,
        params: &MetricAnalysisParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().metric_analysis(params)?)
    }

    fn run_metric_analysis_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<MetricAnalysisRow>, WarehouseError> {
        decode_rows("metric analysis", self.run_query(sql, observer)?)
    }

    fn get_past_experiments_query(
        &self,
        params: &PastExperimentParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().past_experiments(params)?)
    }

    fn run_past_experiments_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<PastExperimentRow>, WarehouseError> {
        decode_rows("past experiments", self.run_query(sql, observer)?)
    }

    fn get_dimension_slices_query(
        &self,
        params: &DimensionSlicesParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().dimension_slices(params)?)
    }

    fn run_dimension_slices_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<DimensionSliceRow>, WarehouseError> {
        decode_rows("dimension slices", self.run_query(sql, observer)?)
    }

    fn get_drop_table_query(&self, params: &DropTableParams) -> Result<String, WarehouseError> {
        Ok(self.compiler().drop_table(params)?)
    }

    fn run_drop_table_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<Option<QueryStatistics>, WarehouseError> {
        Ok(self.run_query(sql, observer)?.statistics)
    }

    fn get_create_units_table_query(
        &self,
        params: &PipelineUnitsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().pipeline_create_units(params)?)
    }

    fn run_create_units_table_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<Option<QueryStatistics>, WarehouseError> {
        Ok(self.run_query(sql, observer)?.statistics)
    }

    fn get_populate_units_query(
        &self,
        params: &PipelineUnitsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().pipeline_populate_units(params)?)
    }

    fn run_populate_units_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<Option<QueryStatistics>, WarehouseError> {
        Ok(self.run_query(sql, observer)?.statistics)
    }

    fn get_trim_metrics_query(
        &self,
        params: &PipelineTrimMetricsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().pipeline_trim_metrics(params)?)
    }

    fn run_trim_metrics_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<Option<QueryStatistics>, WarehouseError> {
        Ok(self.run_query(sql, observer)?.statistics)
    }

    fn get_pipeline_fact_metrics_query(
        &self,
        params: &PipelineUnitsParams,
        group: &[FactMetric],
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().pipeline_fact_metrics(params, group)?)
    }

    fn run_pipeline_fact_metrics_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<Option<QueryStatistics>, WarehouseError> {
        Ok(self.run_query(sql, observer)?.statistics)
    }

    fn get_pipeline_statistics_query(
        &self,
        params: &PipelineFactMetricsParams,
    ) -> Result<String, WarehouseError> {
        Ok(self.compiler().pipeline_statistics(params)?)
    }

    fn run_pipeline_statistics_query(
        &self,
        sql: &str,
        observer: &dyn JobObserver,
    ) -> Result<QueryResponse<FactMetricsRow>, WarehouseError> {
        decode_rows("pipeline statistics", self.run_query(sql, observer)?)
    }
}

/// Build the connector named by `config.dialect`.
///
/// Only the embedded SQLite warehouse ships with a connector; it requires
/// the `path` parameter (`:memory:` for an in-memory database).
pub fn connector_for_config(
    config: &WarehouseConfig,
) -> Result<Box<dyn WarehouseConnector>, WarehouseError> {
    let dialect = config.effective_dialect();
    match dialect_for_name(dialect).map(|d| d.name()) {
        Some("sqlite") => {
            let path = config
                .param("path")
                .ok_or_else(|| WarehouseError::MissingDatasourceParams {
                    message: "sqlite requires a `path` parameter".to_string(),
                })?;
            let connector = if path == ":memory:" {
                SqliteConnector::open_in_memory()?
            } else {
                SqliteConnector::open(std::path::Path::new(path))?
            };
            Ok(Box::new(connector))
        }
        _ => {
            tracing::warn!(dialect, "no connector available for dialect");
            Err(WarehouseError::DataSourceNotSupported)
        }
    }
}
