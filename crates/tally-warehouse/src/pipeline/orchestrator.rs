//! Sequential driver for the incremental pipeline.

use std::sync::Arc;
use std::time::Instant;

use tally_core::errors::{PipelineError, WarehouseError};
use tally_core::model::{DropTableParams, PipelineFactMetricsParams};
use tally_core::traits::{Cancellable, CancellationToken};

use super::stage::{PipelineStage, PipelineState};
use crate::compiler::metrics_table_name;
use crate::connector::{FactMetricsRow, JobObserver, NoopObserver, QueryResponse, WarehouseConnector};

/// Stage label used when dropping tables before a fresh run.
pub const DROP_TABLES_STAGE: &str = "DropTables";

/// Every statement of a run, compiled before anything executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    pub create_units: String,
    pub populate_units: String,
    pub trim_metrics: String,
    /// One statement per metric group, in group order.
    pub fact_metrics: Vec<String>,
    pub statistics: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub statistics: QueryResponse<FactMetricsRow>,
}

/// Runs `CreateUnitsTable → PopulateUnits → TrimMetrics →
/// ComputeFactMetrics → ComputeStatistics` for one experiment snapshot.
///
/// A failed stage stops the run. Earlier stages are not rolled back.
pub struct PipelineOrchestrator<'c> {
    connector: &'c dyn WarehouseConnector,
    observer: Arc<dyn JobObserver>,
    token: CancellationToken,
}

impl<'c> PipelineOrchestrator<'c> {
    pub fn new(connector: &'c dyn WarehouseConnector) -> Self {
        Self {
            connector,
            observer: Arc::new(NoopObserver),
            token: CancellationToken::new(),
        }
    }

    /// Receive the handle of every job the run submits.
    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stop before the next stage (or metric group) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Compile every statement of a run.
    pub fn plan(&self, params: &PipelineFactMetricsParams) -> Result<PipelinePlan, PipelineError> {
        let compiler = self.connector.compiler();
        let units = &params.units;
        let fact_metrics = params
            .metric_groups
            .iter()
            .map(|group| compiler.pipeline_fact_metrics(units, group))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PipelinePlan {
            create_units: compiler.pipeline_create_units(units)?,
            populate_units: compiler.pipeline_populate_units(units)?,
            trim_metrics: compiler.pipeline_trim_metrics(&params.trim_params())?,
            fact_metrics,
            statistics: compiler.pipeline_statistics(params)?,
        })
    }

    /// Execute a run. Tables left by earlier runs are extended from the
    /// lookback date; [`Self::run_fresh`] starts over.
    pub fn run(&self, params: &PipelineFactMetricsParams) -> Result<PipelineRun, PipelineError> {
        let experiment_id = params.units.base.settings.experiment_id.as_str();
        let table_name = params.units.table_name.as_str();
        if !self.connector.supports_pipeline() {
            return Err(PipelineError::StageFailed {
                stage: PipelineStage::CreateUnitsTable.name(),
                source: WarehouseError::DataSourceNotSupported,
            });
        }
        let plan = self.plan(params)?;
        tracing::info!(
            experiment_id,
            table = table_name,
            groups = plan.fact_metrics.len(),
            lookback_date = %params.units.lookback_date,
            "pipeline run started"
        );

        let observer = self.observer.as_ref();
        let mut state = PipelineState::new(table_name, params.units.lookback_date);
        let mut statistics = None;
        while !state.is_done() {
            let stage = state.current();
            self.check_cancelled(stage)?;
            let started = Instant::now();
            let fail = |source: WarehouseError| {
                tracing::error!(experiment_id, stage = stage.name(), error = %source, "pipeline stage failed");
                PipelineError::StageFailed {
                    stage: stage.name(),
                    source,
                }
            };
            match stage {
                PipelineStage::CreateUnitsTable => {
                    self.connector
                        .run_create_units_table_query(&plan.create_units, observer)
                        .map_err(fail)?;
                }
                PipelineStage::PopulateUnits => {
                    self.connector
                        .run_populate_units_query(&plan.populate_units, observer)
                        .map_err(fail)?;
                }
                PipelineStage::TrimMetrics => {
                    self.connector
                        .run_trim_metrics_query(&plan.trim_metrics, observer)
                        .map_err(fail)?;
                }
                PipelineStage::ComputeFactMetrics => {
                    for (group, sql) in plan.fact_metrics.iter().enumerate() {
                        self.check_cancelled(stage)?;
                        tracing::debug!(experiment_id, group, "computing metric group");
                        self.connector
                            .run_pipeline_fact_metrics_query(sql, observer)
                            .map_err(fail)?;
                    }
                }
                PipelineStage::ComputeStatistics => {
                    statistics = Some(
                        self.connector
                            .run_pipeline_statistics_query(&plan.statistics, observer)
                            .map_err(fail)?,
                    );
                }
                PipelineStage::Done => break,
            }
            tracing::info!(
                experiment_id,
                stage = stage.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pipeline stage finished"
            );
            state.advance();
        }

        Ok(PipelineRun {
            state,
            statistics: statistics.unwrap_or(QueryResponse {
                rows: Vec::new(),
                statistics: None,
            }),
        })
    }

    /// Drop the units and metrics tables, then run from scratch.
    pub fn run_fresh(&self, params: &PipelineFactMetricsParams) -> Result<PipelineRun, PipelineError> {
        self.drop_tables(&params.units.table_name)?;
        self.run(params)
    }

    /// Drop a units table and its metrics companion if they exist.
    pub fn drop_tables(&self, table_name: &str) -> Result<(), PipelineError> {
        for table in [metrics_table_name(table_name), table_name.to_string()] {
            let sql = self.connector.compiler().drop_table(&DropTableParams {
                full_table_path: table,
            })?;
            self.connector
                .run_drop_table_query(&sql, self.observer.as_ref())
                .map_err(|source| PipelineError::StageFailed {
                    stage: DROP_TABLES_STAGE,
                    source,
                })?;
        }
        Ok(())
    }

    fn check_cancelled(&self, stage: PipelineStage) -> Result<(), PipelineError> {
        if self.token.is_cancelled() {
            tracing::warn!(stage = stage.name(), "pipeline cancelled");
            return Err(PipelineError::Cancelled {
                stage: stage.name(),
            });
        }
        Ok(())
    }
}
