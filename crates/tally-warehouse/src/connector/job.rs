//! Submitted warehouse jobs and their handles.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_core::errors::WarehouseError;
use tally_core::traits::Cancellable;

/// One result row, keyed by column name.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Identifies an accepted job and lets a separate path cancel it.
#[derive(Clone)]
pub struct JobHandle {
    job_id: String,
    canceller: Arc<dyn Cancellable + Send + Sync>,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, canceller: Arc<dyn Cancellable + Send + Sync>) -> Self {
        Self {
            job_id: job_id.into(),
            canceller,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Best effort: a job that already finished is left alone.
    pub fn cancel(&self) {
        tracing::info!(job_id = %self.job_id, "cancelling warehouse job");
        self.canceller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Receives the handle of every accepted job, once, before rows are awaited.
pub trait JobObserver: Send + Sync {
    fn on_job_accepted(&self, handle: &JobHandle);
}

impl<F> JobObserver for F
where
    F: Fn(&JobHandle) + Send + Sync,
{
    fn on_job_accepted(&self, handle: &JobHandle) {
        self(handle)
    }
}

/// Observer that ignores handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {
    fn on_job_accepted(&self, _handle: &JobHandle) {}
}

/// A query the warehouse accepted but whose rows have not been read.
pub trait QueryJob {
    fn handle(&self) -> JobHandle;

    /// Block until the job finishes.
    fn wait(self: Box<Self>) -> Result<RawQueryResult, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStatistics {
    pub job_id: String,
    pub duration_ms: u64,
    pub rows_returned: usize,
    #[serde(default)]
    pub bytes_processed: Option<u64>,
}

/// Untyped rows as returned by a connector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQueryResult {
    pub rows: Vec<JsonRow>,
    pub statistics: Option<QueryStatistics>,
}

/// Typed rows of one query kind.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse<R> {
    pub rows: Vec<R>,
    pub statistics: Option<QueryStatistics>,
}

impl<R> QueryResponse<R> {
    pub fn job_id(&self) -> Option<&str> {
        self.statistics.as_ref().map(|s| s.job_id.as_str())
    }
}
