//! Incremental pipeline tests.
//!
//! Against SQLite, a pipeline run must produce the same statistics as the
//! one-shot fact metrics query, including after an incremental rerun. A
//! recording connector checks stage order, failure handling and
//! cancellation.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tally_core::config::{PipelineConfig, WarehouseConfig};
use tally_core::errors::{PipelineError, WarehouseError};
use tally_core::model::*;
use tally_core::traits::{Cancellable, CancellationToken};
use tally_warehouse::connector::{
    FactMetricsRow, JobHandle, NoopObserver, QueryJob, RawQueryResult, SqliteConnector,
    WarehouseConnector,
};
use tally_warehouse::dialect::{SqlDialect, SqliteDialect};
use tally_warehouse::pipeline::{
    group_metrics, lookback_date, pipeline_params, pipeline_table_name, PipelineOrchestrator,
    PipelineStage, PipelineState,
};

const SEED: &str = "
CREATE TABLE exposures (user_id TEXT, timestamp TEXT, experiment_id TEXT, variation_id TEXT);
INSERT INTO exposures VALUES
  ('u1', '2024-03-01 10:00:00', 'checkout', '0'),
  ('u2', '2024-03-02 10:00:00', 'checkout', '0'),
  ('u3', '2024-03-01 12:00:00', 'checkout', '1'),
  ('u4', '2024-03-03 09:00:00', 'checkout', '1'),
  ('u5', '2024-03-02 08:00:00', 'checkout', '0'),
  ('u5', '2024-03-04 08:00:00', 'checkout', '1');
CREATE TABLE orders (user_id TEXT, timestamp TEXT, amount REAL);
INSERT INTO orders VALUES
  ('u1', '2024-03-01 12:00:00', 10),
  ('u1', '2024-03-05 08:00:00', 20),
  ('u2', '2024-03-02 11:00:00', 5),
  ('u3', '2024-03-01 13:00:00', 30),
  ('u3', '2024-03-02 13:00:00', 10),
  ('u5', '2024-03-04 12:00:00', 100);
";

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
}

fn base() -> ExperimentBaseParams {
    let exposure_query = ExposureQuery {
        id: "user_exposures".to_string(),
        user_id_type: "user_id".to_string(),
        sql: "SELECT user_id, timestamp, experiment_id, variation_id FROM exposures".to_string(),
        dimensions: vec![],
    };
    let settings = SnapshotSettings::new(
        "checkout",
        exposure_query,
        ts(1),
        ts(15),
        vec!["0".to_string(), "1".to_string()],
    );
    let orders = FactTable {
        id: "orders".to_string(),
        name: "Orders".to_string(),
        sql: "SELECT user_id, timestamp, amount FROM orders".to_string(),
        user_id_types: vec!["user_id".to_string()],
    };
    ExperimentBaseParams::new(settings, fact_table_map([orders]))
}

fn metrics() -> Vec<FactMetric> {
    let mut revenue = FactMetric::new(
        "revenue",
        "Revenue",
        MetricKind::Mean,
        ColumnRef::new("orders", "amount"),
    );
    revenue.window = MetricWindow::conversion(0, 72);
    let purchased = FactMetric::new(
        "purchased",
        "Purchased",
        MetricKind::Proportion,
        ColumnRef::distinct_users("orders"),
    );
    let mut max_order = FactMetric::new(
        "max_order",
        "Largest order",
        MetricKind::Mean,
        ColumnRef::new("orders", "amount").with_aggregation(ColumnAggregation::Max),
    );
    max_order.window = MetricWindow::conversion(0, 72);
    vec![revenue, purchased, max_order]
}

fn one_shot(connector: &SqliteConnector) -> Vec<FactMetricsRow> {
    let sql = connector
        .get_experiment_fact_metrics_query(&ExperimentFactMetricsParams {
            base: base(),
            metrics: metrics(),
            units_table: None,
        })
        .unwrap();
    connector
        .run_experiment_fact_metrics_query(&sql, &NoopObserver)
        .unwrap()
        .rows
}

/// Compare statistics numerically: stored partial values come back as
/// floats where the one-shot query may return integers.
fn assert_same_statistics(expected: &[FactMetricsRow], actual: &[FactMetricsRow]) {
    assert_eq!(expected.len(), actual.len());
    for (e, a) in expected.iter().zip(actual) {
        assert_eq!(e.variation, a.variation);
        assert_eq!(e.dimension, a.dimension);
        assert_eq!(e.users, a.users);
        for i in 0..metrics().len() {
            for column in ["main_sum", "main_sum_squares"] {
                assert_eq!(
                    e.value(i, column),
                    a.value(i, column),
                    "variation {} metric {i} {column}",
                    e.variation
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLite runs
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_first_run_matches_one_shot_query() {
    let connector = SqliteConnector::open_in_memory().unwrap();
    connector.execute_batch(SEED).unwrap();
    let config = PipelineConfig {
        max_metrics_per_group: Some(2),
        ..Default::default()
    };
    let params = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        None,
        &config,
        &WarehouseConfig::default(),
    );
    assert_eq!(params.metric_groups.len(), 2);
    assert_eq!(params.units.lookback_date, ts(1));

    let run = PipelineOrchestrator::new(&connector).run(&params).unwrap();
    assert!(run.state.is_done());
    assert_eq!(run.state.table_name(), params.units.table_name);
    assert_eq!(run.state.lookback_date(), ts(1));
    assert_same_statistics(&one_shot(&connector), &run.statistics.rows);

    let control = &run.statistics.rows[0];
    assert_eq!(control.value(0, "main_sum"), Some(15.0));
    assert_eq!(control.value(2, "main_sum"), Some(15.0));
}

#[test]
fn test_incremental_rerun_picks_up_late_data_without_duplicates() {
    let connector = SqliteConnector::open_in_memory().unwrap();
    connector.execute_batch(SEED).unwrap();
    let config = PipelineConfig::default();
    let orchestrator = PipelineOrchestrator::new(&connector);

    let first = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        None,
        &config,
        &WarehouseConfig::default(),
    );
    orchestrator.run(&first).unwrap();

    connector
        .execute_batch(
            "INSERT INTO orders VALUES ('u4', '2024-03-06 08:00:00', 7);
             INSERT INTO exposures VALUES ('u6', '2024-03-05 09:00:00', 'checkout', '1');
             INSERT INTO orders VALUES ('u6', '2024-03-05 10:00:00', 3);",
        )
        .unwrap();

    let second = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        Some(Utc.with_ymd_and_hms(2024, 3, 5, 6, 0, 0).unwrap()),
        &config,
        &WarehouseConfig::default(),
    );
    assert_eq!(second.units.table_name, first.units.table_name);
    assert_eq!(
        second.units.lookback_date,
        Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap()
    );
    let run = orchestrator.run(&second).unwrap();
    assert_eq!(run.state.lookback_date(), second.units.lookback_date);

    let expected = one_shot(&connector);
    assert_same_statistics(&expected, &run.statistics.rows);
    let treatment = &run.statistics.rows[1];
    assert_eq!(treatment.users, 3);
    assert_eq!(treatment.value(0, "main_sum"), Some(50.0));
}

#[test]
fn test_incremental_rerun_moves_reexposed_units_to_multiple() {
    let connector = SqliteConnector::open_in_memory().unwrap();
    connector.execute_batch(SEED).unwrap();
    let config = PipelineConfig::default();
    let orchestrator = PipelineOrchestrator::new(&connector);

    let first = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        None,
        &config,
        &WarehouseConfig::default(),
    );
    let run = orchestrator.run(&first).unwrap();
    let users: Vec<(&str, u64)> = run
        .statistics
        .rows
        .iter()
        .map(|r| (r.variation.as_str(), r.users))
        .collect();
    assert_eq!(users, vec![("0", 2), ("1", 2)]);

    // u1 was stored under control before the lookback date.
    connector
        .execute_batch(
            "INSERT INTO exposures VALUES ('u1', '2024-03-06 09:00:00', 'checkout', '1');",
        )
        .unwrap();
    let second = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        Some(Utc.with_ymd_and_hms(2024, 3, 5, 6, 0, 0).unwrap()),
        &config,
        &WarehouseConfig::default(),
    );
    let run = orchestrator.run(&second).unwrap();

    assert_same_statistics(&one_shot(&connector), &run.statistics.rows);
    let users: Vec<(&str, u64)> = run
        .statistics
        .rows
        .iter()
        .map(|r| (r.variation.as_str(), r.users))
        .collect();
    assert_eq!(users, vec![("0", 1), ("1", 2)]);

    let stored = connector
        .run_query(
            &format!(
                "SELECT variation FROM {} WHERE user_id = 'u1'",
                second.units.table_name
            ),
            &NoopObserver,
        )
        .unwrap();
    assert_eq!(
        stored.rows[0]["variation"],
        serde_json::json!(MULTIPLE_EXPOSURES_VARIATION)
    );
}

#[test]
fn test_run_fresh_drops_existing_tables() {
    let connector = SqliteConnector::open_in_memory().unwrap();
    connector.execute_batch(SEED).unwrap();
    let params = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        None,
        &PipelineConfig::default(),
        &WarehouseConfig::default(),
    );
    let orchestrator = PipelineOrchestrator::new(&connector);
    orchestrator.run(&params).unwrap();
    let rerun = orchestrator.run_fresh(&params).unwrap();
    assert_same_statistics(&one_shot(&connector), &rerun.statistics.rows);

    orchestrator.drop_tables(&params.units.table_name).unwrap();
    let tables = connector.schema_inspector().unwrap().list_tables().unwrap();
    assert!(tables.iter().all(|t| !t.name.starts_with("tally_pipeline")));
}

#[test]
fn test_tables_are_created_in_default_schema() {
    let connector = SqliteConnector::open_in_memory().unwrap();
    connector.execute_batch(SEED).unwrap();
    let warehouse = WarehouseConfig {
        default_schema: Some("main".to_string()),
        ..Default::default()
    };
    let params = pipeline_params(
        base(),
        &metrics(),
        "snap1",
        None,
        &PipelineConfig::default(),
        &warehouse,
    );
    assert!(params.units.table_name.starts_with("main.tally_pipeline_checkout_snap1_"));

    let orchestrator = PipelineOrchestrator::new(&connector);
    let run = orchestrator.run(&params).unwrap();
    assert_same_statistics(&one_shot(&connector), &run.statistics.rows);
    let tables = connector.schema_inspector().unwrap().list_tables().unwrap();
    assert!(tables.iter().any(|t| t.name.starts_with("tally_pipeline_checkout")));

    orchestrator.drop_tables(&params.units.table_name).unwrap();
    let tables = connector.schema_inspector().unwrap().list_tables().unwrap();
    assert!(tables.iter().all(|t| !t.name.starts_with("tally_pipeline")));
}

// ═══════════════════════════════════════════════════════════════════════════
// Stage sequencing
// ═══════════════════════════════════════════════════════════════════════════

/// Records every submitted statement; fails statements containing
/// `fail_on`.
struct RecordingConnector {
    dialect: SqliteDialect,
    statements: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
    pipeline: bool,
}

impl RecordingConnector {
    fn new(fail_on: Option<&'static str>) -> Self {
        Self {
            dialect: SqliteDialect,
            statements: Mutex::new(Vec::new()),
            fail_on,
            pipeline: true,
        }
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

struct RecordedJob {
    id: String,
    fail: bool,
    token: Arc<CancellationToken>,
}

impl QueryJob for RecordedJob {
    fn handle(&self) -> JobHandle {
        JobHandle::new(self.id.clone(), self.token.clone())
    }

    fn wait(self: Box<Self>) -> Result<RawQueryResult, WarehouseError> {
        if self.fail {
            return Err(WarehouseError::query_failed("boom"));
        }
        Ok(RawQueryResult::default())
    }
}

impl WarehouseConnector for RecordingConnector {
    fn name(&self) -> &str {
        "recording"
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    fn supports_pipeline(&self) -> bool {
        self.pipeline
    }

    fn submit(&self, sql: &str) -> Result<Box<dyn QueryJob + '_>, WarehouseError> {
        let mut statements = self.statements.lock().unwrap();
        statements.push(sql.to_string());
        Ok(Box::new(RecordedJob {
            id: format!("job-{}", statements.len()),
            fail: self.fail_on.is_some_and(|needle| sql.contains(needle)),
            token: Arc::new(CancellationToken::new()),
        }))
    }
}

fn stage_of(sql: &str) -> &'static str {
    if sql.starts_with("CREATE TABLE IF NOT EXISTS") {
        "create"
    } else if sql.starts_with("DELETE FROM") {
        "trim"
    } else if sql.starts_with("INSERT INTO") && sql.lines().next().unwrap().contains("_metrics") {
        "fact"
    } else if sql.starts_with("INSERT INTO") {
        "populate"
    } else if sql.starts_with("DROP TABLE") {
        "drop"
    } else {
        "statistics"
    }
}

fn two_group_params() -> PipelineFactMetricsParams {
    let config = PipelineConfig {
        max_metrics_per_group: Some(2),
        ..Default::default()
    };
    pipeline_params(base(), &metrics(), "snap1", None, &config, &WarehouseConfig::default())
}

#[test]
fn test_stages_run_in_order() {
    let connector = RecordingConnector::new(None);
    let run = PipelineOrchestrator::new(&connector)
        .run(&two_group_params())
        .unwrap();
    let stages: Vec<&str> = connector.statements().iter().map(|s| stage_of(s)).collect();
    assert_eq!(
        stages,
        ["create", "populate", "trim", "fact", "fact", "statistics"]
    );
    assert_eq!(
        run.state.completed(),
        &PipelineStage::ORDER[..PipelineStage::ORDER.len() - 1]
    );
    assert!(run.statistics.rows.is_empty());
}

#[test]
fn test_failed_stage_stops_the_run() {
    let connector = RecordingConnector::new(Some("DELETE FROM"));
    let err = PipelineOrchestrator::new(&connector)
        .run(&two_group_params())
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageFailed {
            stage: "TrimMetrics",
            source: WarehouseError::QueryFailed { .. }
        }
    ));
    assert_eq!(err.stage(), Some("TrimMetrics"));
    let stages: Vec<&str> = connector.statements().iter().map(|s| stage_of(s)).collect();
    assert_eq!(stages, ["create", "populate", "trim"]);
}

#[test]
fn test_cancelled_run_submits_nothing_further() {
    let connector = RecordingConnector::new(None);
    let token = CancellationToken::new();
    let orchestrator = PipelineOrchestrator::new(&connector).with_cancellation(token.clone());

    let cancel_on_populate = {
        let token = token.clone();
        move |handle: &JobHandle| {
            if handle.job_id() == "job-2" {
                token.cancel();
            }
        }
    };
    let orchestrator = orchestrator.with_observer(Arc::new(cancel_on_populate));
    let err = orchestrator.run(&two_group_params()).unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { stage: "TrimMetrics" }));
    assert_eq!(connector.statements().len(), 2);
    assert!(orchestrator.cancellation_token().is_cancelled());
}

#[test]
fn test_unsupported_warehouse_fails_first_stage() {
    let mut connector = RecordingConnector::new(None);
    connector.pipeline = false;
    let err = PipelineOrchestrator::new(&connector)
        .run(&two_group_params())
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageFailed {
            stage: "CreateUnitsTable",
            source: WarehouseError::DataSourceNotSupported
        }
    ));
    assert!(connector.statements().is_empty());
}

#[test]
fn test_invalid_plan_submits_nothing() {
    let connector = RecordingConnector::new(None);
    let mut params = two_group_params();
    params.units.base.settings.activation_metric = Some(metrics().remove(1));
    let err = PipelineOrchestrator::new(&connector).run(&params).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidPlan(_)));
    assert!(connector.statements().is_empty());
}

#[test]
fn test_drop_tables_drops_metrics_first() {
    let connector = RecordingConnector::new(None);
    PipelineOrchestrator::new(&connector)
        .drop_tables("tally_pipeline_checkout")
        .unwrap();
    assert_eq!(
        connector.statements(),
        [
            "DROP TABLE IF EXISTS tally_pipeline_checkout_metrics",
            "DROP TABLE IF EXISTS tally_pipeline_checkout",
        ]
    );
}

#[test]
fn test_connection_check_needs_one_row() {
    let connector = RecordingConnector::new(None);
    let err = connector.test_connection().unwrap_err();
    assert!(matches!(err, WarehouseError::QueryFailed { .. }));
    assert_eq!(connector.statements(), ["SELECT 1 AS ok"]);

    let failing = RecordingConnector::new(Some("SELECT 1"));
    assert!(failing.test_connection().is_err());
}

// ═══════════════════════════════════════════════════════════════════════════
// Planning helpers
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_state_advances_one_stage_at_a_time() {
    let mut state = PipelineState::new("tally_pipeline_checkout", ts(4));
    assert_eq!(state.current(), PipelineStage::CreateUnitsTable);
    assert_eq!(state.advance(), PipelineStage::PopulateUnits);
    assert_eq!(state.completed(), [PipelineStage::CreateUnitsTable]);
    while !state.is_done() {
        state.advance();
    }
    assert_eq!(state.advance(), PipelineStage::Done);
    assert_eq!(state.completed().len(), 5);
    assert_eq!(state.table_name(), "tally_pipeline_checkout");
    assert_eq!(state.lookback_date(), ts(4));
    assert_eq!(PipelineStage::TrimMetrics.to_string(), "TrimMetrics");
}

#[test]
fn test_group_metrics_splits_by_fact_table_then_size() {
    let metric = |id: &str, table: &str| {
        FactMetric::new(id, id, MetricKind::Mean, ColumnRef::count(table))
    };
    let metrics = vec![
        metric("a", "orders"),
        metric("b", "views"),
        metric("c", "orders"),
        metric("d", "orders"),
    ];
    let groups: Vec<Vec<String>> = group_metrics(&metrics, 2)
        .into_iter()
        .map(|g| g.into_iter().map(|m| m.id).collect())
        .collect();
    assert_eq!(groups, [vec!["a", "c"], vec!["d"], vec!["b"]]);
}

#[test]
fn test_table_names_are_sanitized_and_distinct() {
    let name = pipeline_table_name("tally_pipeline", "Checkout-Flow v2", "snap/1");
    assert!(name.starts_with("tally_pipeline_checkout_flow_v2_snap_1_"));
    assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    assert_ne!(
        pipeline_table_name("p", "a-b", "c"),
        pipeline_table_name("p", "a_b", "c")
    );
    assert_eq!(
        pipeline_table_name("p", "exp", "snap"),
        pipeline_table_name("p", "exp", "snap")
    );
}

#[test]
fn test_lookback_date_never_precedes_start() {
    assert_eq!(lookback_date(None, ts(1), 24), ts(1));
    assert_eq!(lookback_date(Some(ts(10)), ts(1), 24), ts(9));
    assert_eq!(lookback_date(Some(ts(1)), ts(1), 48), ts(1));
    assert_eq!(
        lookback_date(Some(DateTime::<Utc>::MIN_UTC), ts(1), u32::MAX),
        ts(1)
    );
}
