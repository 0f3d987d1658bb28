//! Cooperative cancellation of pipeline runs and warehouse jobs.
//!
//! The pipeline orchestrator checks its token before each stage and each
//! metric group, so a cancelled run stops between statements. A cancelled
//! SQLite job is refused if it has not started and interrupted through the
//! connection's interrupt handle if it has.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something that can be asked to stop: a pipeline run or a submitted
/// warehouse job.
pub trait Cancellable {
    /// Check if cancellation has been requested.
    fn is_cancelled(&self) -> bool;

    /// Request cancellation.
    fn cancel(&self);
}

/// Flag shared between whoever requests the stop and the run or job that
/// polls it. Clones share state, so a clone handed to another thread can
/// cancel a run in progress.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cancellable for CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
