//! Edge-triggered deduplication of alerts.
//!
//! | ledger  | triggered | action                         |
//! |---------|-----------|--------------------------------|
//! | absent  | true      | dispatch, then add the tag     |
//! | absent  | false     | nothing                        |
//! | present | true      | nothing (episode still open)   |
//! | present | false     | remove the tag, no dispatch    |

use tally_core::errors::NotificationError;
use tally_core::events::NotificationType;

use crate::ledger::NotificationLedger;

/// What a memoized evaluation did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoOutcome {
    /// Rising edge: the alert went out and the tag was added.
    Dispatched,
    /// Falling edge: the tag was removed silently.
    Silenced,
    /// No edge.
    Unchanged,
}

impl MemoOutcome {
    /// Whether the ledger must be written back.
    pub fn changed_ledger(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Apply one `(kind, triggered)` observation to `ledger`.
///
/// `dispatch` runs only on a rising edge. If it fails the ledger is left
/// untouched so the episode is retried on the next evaluation.
pub fn memoize<F>(
    ledger: &mut NotificationLedger,
    kind: NotificationType,
    triggered: bool,
    dispatch: F,
) -> Result<MemoOutcome, NotificationError>
where
    F: FnOnce() -> Result<(), NotificationError>,
{
    match (ledger.contains(kind), triggered) {
        (false, true) => {
            dispatch()?;
            ledger.insert(kind);
            Ok(MemoOutcome::Dispatched)
        }
        (true, false) => {
            ledger.remove(kind);
            Ok(MemoOutcome::Silenced)
        }
        _ => Ok(MemoOutcome::Unchanged),
    }
}
