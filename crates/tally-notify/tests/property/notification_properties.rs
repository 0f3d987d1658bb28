//! Property tests: the memoization table over arbitrary observation
//! sequences, and strict detector thresholds.

use proptest::prelude::*;

use tally_core::events::NotificationType;
use tally_notify::detectors::{
    multiple_exposures_percent, multiple_exposures_triggered, srm_triggered,
};
use tally_notify::{memoize, MemoOutcome, NotificationLedger};

fn kind_strategy() -> impl Strategy<Value = NotificationType> {
    prop::sample::select(NotificationType::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_ledger_tracks_last_observation(
        steps in prop::collection::vec((kind_strategy(), any::<bool>()), 0..64)
    ) {
        let mut ledger = NotificationLedger::new();
        let mut dispatched = 0usize;
        let mut last = [None::<bool>; 3];
        let mut expected_dispatches = 0usize;

        for (kind, triggered) in steps {
            let slot = NotificationType::ALL.iter().position(|k| *k == kind).unwrap();
            let was_open = last[slot] == Some(true);
            if triggered && !was_open {
                expected_dispatches += 1;
            }
            last[slot] = Some(triggered);

            let outcome = memoize(&mut ledger, kind, triggered, || {
                dispatched += 1;
                Ok(())
            })
            .unwrap();
            match outcome {
                MemoOutcome::Dispatched => prop_assert!(triggered && !was_open),
                MemoOutcome::Silenced => prop_assert!(!triggered && was_open),
                MemoOutcome::Unchanged => prop_assert_eq!(triggered, was_open),
            }
        }

        prop_assert_eq!(dispatched, expected_dispatches);
        for (slot, kind) in NotificationType::ALL.iter().enumerate() {
            prop_assert_eq!(ledger.contains(*kind), last[slot] == Some(true));
        }
        prop_assert!(ledger.len() <= NotificationType::ALL.len());
    }

    #[test]
    fn prop_srm_fires_only_below_threshold(srm in 0.0f64..1.0, threshold in 0.0f64..0.1) {
        prop_assert_eq!(srm_triggered(srm, threshold), srm < threshold);
        prop_assert!(!srm_triggered(threshold, threshold));
    }

    #[test]
    fn prop_multiple_exposures_fires_only_above_threshold(
        exposures in 0u64..10_000,
        total in 0u64..10_000,
        threshold in 0.0f64..0.5,
    ) {
        let percent = multiple_exposures_percent(exposures, total);
        let triggered = multiple_exposures_triggered(percent, threshold);
        if total == 0 {
            prop_assert!(!triggered);
        } else {
            let p = exposures as f64 / total as f64;
            prop_assert_eq!(triggered, p > threshold);
            prop_assert!(!multiple_exposures_triggered(Some(threshold), threshold));
        }
    }
}
