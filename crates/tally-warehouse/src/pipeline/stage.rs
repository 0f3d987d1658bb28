//! Pipeline stages and run state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stages of an incremental refresh, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    CreateUnitsTable,
    PopulateUnits,
    TrimMetrics,
    ComputeFactMetrics,
    ComputeStatistics,
    Done,
}

impl PipelineStage {
    pub const ORDER: [PipelineStage; 6] = [
        Self::CreateUnitsTable,
        Self::PopulateUnits,
        Self::TrimMetrics,
        Self::ComputeFactMetrics,
        Self::ComputeStatistics,
        Self::Done,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CreateUnitsTable => "CreateUnitsTable",
            Self::PopulateUnits => "PopulateUnits",
            Self::TrimMetrics => "TrimMetrics",
            Self::ComputeFactMetrics => "ComputeFactMetrics",
            Self::ComputeStatistics => "ComputeStatistics",
            Self::Done => "Done",
        }
    }

    /// The stage after this one. `Done` is terminal.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::CreateUnitsTable => Some(Self::PopulateUnits),
            Self::PopulateUnits => Some(Self::TrimMetrics),
            Self::TrimMetrics => Some(Self::ComputeFactMetrics),
            Self::ComputeFactMetrics => Some(Self::ComputeStatistics),
            Self::ComputeStatistics => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A run over one units table: which table, from which lookback date, and
/// how far it got. The stage only moves forward, one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    table_name: String,
    lookback_date: DateTime<Utc>,
    current: PipelineStage,
    completed: Vec<PipelineStage>,
}

impl PipelineState {
    pub fn new(table_name: impl Into<String>, lookback_date: DateTime<Utc>) -> Self {
        Self {
            table_name: table_name.into(),
            lookback_date,
            current: PipelineStage::CreateUnitsTable,
            completed: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Earliest date the run recomputes.
    pub fn lookback_date(&self) -> DateTime<Utc> {
        self.lookback_date
    }

    /// The stage to run next.
    pub fn current(&self) -> PipelineStage {
        self.current
    }

    pub fn completed(&self) -> &[PipelineStage] {
        &self.completed
    }

    pub fn is_done(&self) -> bool {
        self.current == PipelineStage::Done
    }

    /// Mark the current stage finished and move to the next one.
    pub fn advance(&mut self) -> PipelineStage {
        if let Some(next) = self.current.next() {
            self.completed.push(self.current);
            self.current = next;
        }
        self.current
    }
}
