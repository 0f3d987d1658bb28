//! Ledger, memoization and detector tests.
//!
//! - every (prior, triggered) pair of the memoization table
//! - a failed dispatch leaves the ledger untouched
//! - detectors compare strictly against their thresholds
//! - every alert type has a payload arm and a ledger tag

use std::cell::Cell;

use tally_core::errors::NotificationError;
use tally_core::events::NotificationType;
use tally_notify::detectors::*;
use tally_notify::dispatch::{payload_for, PayloadDetail};
use tally_notify::{memoize, ExperimentRecord, MemoOutcome, NotificationLedger};

fn ledger_with(kinds: &[NotificationType]) -> NotificationLedger {
    kinds.iter().copied().collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Ledger
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_ledger_keeps_insertion_order_without_duplicates() {
    let mut ledger = NotificationLedger::new();
    assert!(ledger.insert(NotificationType::Srm));
    assert!(ledger.insert(NotificationType::AutoUpdate));
    assert!(!ledger.insert(NotificationType::Srm));
    assert_eq!(
        ledger.iter().collect::<Vec<_>>(),
        vec![NotificationType::Srm, NotificationType::AutoUpdate]
    );
    assert!(ledger.remove(NotificationType::Srm));
    assert!(!ledger.remove(NotificationType::Srm));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_ledger_serializes_as_tag_list() {
    let ledger = ledger_with(&[NotificationType::MultipleExposures, NotificationType::Srm]);
    let json = serde_json::to_string(&ledger).unwrap();
    assert_eq!(json, r#"["multiple-exposures","srm"]"#);
    let back: NotificationLedger = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ledger);
}

#[test]
fn test_experiment_record_uses_past_notifications_field() {
    let mut experiment = ExperimentRecord::new("exp_1", "Checkout");
    experiment.past_notifications.insert(NotificationType::AutoUpdate);
    let value = serde_json::to_value(&experiment).unwrap();
    assert_eq!(value["pastNotifications"], serde_json::json!(["auto-update"]));
    assert_eq!(value["hasLinkedChanges"], serde_json::json!(false));
}

// ═══════════════════════════════════════════════════════════════════════════
// Memoization table
// ═══════════════════════════════════════════════════════════════════════════

fn run(prior: bool, triggered: bool) -> (MemoOutcome, usize, bool) {
    let kind = NotificationType::Srm;
    let mut ledger = if prior {
        ledger_with(&[kind])
    } else {
        NotificationLedger::new()
    };
    let calls = Cell::new(0);
    let outcome = memoize(&mut ledger, kind, triggered, || {
        calls.set(calls.get() + 1);
        Ok(())
    })
    .unwrap();
    (outcome, calls.get(), ledger.contains(kind))
}

#[test]
fn test_absent_and_triggered_dispatches_and_adds() {
    assert_eq!(run(false, true), (MemoOutcome::Dispatched, 1, true));
}

#[test]
fn test_absent_and_clear_is_noop() {
    assert_eq!(run(false, false), (MemoOutcome::Unchanged, 0, false));
}

#[test]
fn test_present_and_triggered_is_noop() {
    assert_eq!(run(true, true), (MemoOutcome::Unchanged, 0, true));
}

#[test]
fn test_present_and_clear_removes_silently() {
    assert_eq!(run(true, false), (MemoOutcome::Silenced, 0, false));
}

#[test]
fn test_new_episode_after_recovery_dispatches_again() {
    let kind = NotificationType::MultipleExposures;
    let mut ledger = NotificationLedger::new();
    let calls = Cell::new(0);
    for triggered in [true, true, false, true] {
        memoize(&mut ledger, kind, triggered, || {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .unwrap();
    }
    assert_eq!(calls.get(), 2);
    assert!(ledger.contains(kind));
}

#[test]
fn test_failed_dispatch_leaves_ledger_untouched() {
    let mut ledger = ledger_with(&[NotificationType::AutoUpdate]);
    let err = memoize(&mut ledger, NotificationType::Srm, true, || {
        Err(NotificationError::EventNotCreated {
            experiment_id: "exp_1".to_string(),
        })
    })
    .unwrap_err();
    assert!(matches!(err, NotificationError::EventNotCreated { .. }));
    assert_eq!(ledger, ledger_with(&[NotificationType::AutoUpdate]));
}

#[test]
fn test_memoize_only_touches_its_own_tag() {
    let mut ledger = ledger_with(&[NotificationType::AutoUpdate, NotificationType::Srm]);
    memoize(&mut ledger, NotificationType::AutoUpdate, false, || Ok(())).unwrap();
    assert_eq!(ledger, ledger_with(&[NotificationType::Srm]));
}

// ═══════════════════════════════════════════════════════════════════════════
// Detectors
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_auto_update_fires_on_failure() {
    assert!(auto_update_triggered(false));
    assert!(!auto_update_triggered(true));
}

#[test]
fn test_srm_is_strict() {
    assert!(srm_triggered(0.0005, 0.001));
    assert!(!srm_triggered(0.001, 0.001));
    assert!(!srm_triggered(0.002, 0.001));
}

#[test]
fn test_multiple_exposures_is_strict() {
    let percent = multiple_exposures_percent(15, 1000);
    assert_eq!(percent, Some(0.015));
    assert!(multiple_exposures_triggered(percent, 0.01));

    let at_threshold = multiple_exposures_percent(10, 1000);
    assert!(!multiple_exposures_triggered(at_threshold, 0.01));
}

#[test]
fn test_multiple_exposures_without_users_never_fires() {
    assert_eq!(multiple_exposures_percent(5, 0), None);
    assert!(!multiple_exposures_triggered(None, 0.0));
}

// ═══════════════════════════════════════════════════════════════════════════
// Alert type coverage
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_every_alert_type_has_payload_and_tag() {
    let experiment = ExperimentRecord::new("exp_1", "Checkout");
    for kind in NotificationType::ALL {
        let payload = payload_for(kind, &experiment, PayloadDetail::default());
        assert_eq!(payload.notification_type(), kind);
        assert_eq!(payload.experiment_id(), "exp_1");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], serde_json::json!(kind.as_str()));
        assert_eq!(kind.as_str().parse::<NotificationType>().unwrap(), kind);

        let mut ledger = NotificationLedger::new();
        ledger.insert(kind);
        assert_eq!(
            serde_json::to_value(&ledger).unwrap(),
            serde_json::json!([kind.as_str()])
        );
    }
}
