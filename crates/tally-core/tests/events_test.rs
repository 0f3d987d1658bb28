//! Tests for alert event serialization.

use std::str::FromStr;

use serde_json::json;
use tally_core::events::{AlertEvent, AlertPayload, EventUser, NotificationType};

#[test]
fn test_envelope_shape() {
    let event = AlertEvent::experiment_warning(
        AlertPayload::Srm {
            experiment_id: "exp_1".to_string(),
            experiment_name: "Checkout".to_string(),
            threshold: 0.001,
        },
        EventUser::System,
        None,
        vec!["production".to_string()],
        vec!["checkout".to_string()],
    );

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(
        value,
        json!({
            "event": "experiment.warning",
            "object": "experiment",
            "data": {
                "type": "srm",
                "experimentId": "exp_1",
                "experimentName": "Checkout",
                "threshold": 0.001
            },
            "user": { "type": "system" },
            "projects": [""],
            "environments": ["production"],
            "tags": ["checkout"],
            "containsSecrets": false
        })
    );
}

#[test]
fn test_multiple_exposures_payload_fields() {
    let payload = AlertPayload::MultipleExposures {
        experiment_id: "exp_2".to_string(),
        experiment_name: "Pricing".to_string(),
        users_count: 40,
        percent: 0.04,
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["type"], "multiple-exposures");
    assert_eq!(value["usersCount"], 40);
    assert_eq!(value["percent"], 0.04);

    let back: AlertPayload = serde_json::from_value(value).unwrap();
    assert_eq!(back, payload);
}

#[test]
fn test_auto_update_payload_fields() {
    let payload = AlertPayload::AutoUpdate {
        success: false,
        experiment_id: "exp_3".to_string(),
        experiment_name: "Search".to_string(),
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["type"], "auto-update");
    assert_eq!(value["success"], false);
    assert_eq!(payload.notification_type(), NotificationType::AutoUpdate);
    assert_eq!(payload.experiment_id(), "exp_3");
}

#[test]
fn test_notification_type_tags() {
    for t in NotificationType::ALL {
        let serialized = serde_json::to_value(t).unwrap();
        assert_eq!(serialized, json!(t.as_str()));
        assert_eq!(NotificationType::from_str(t.as_str()).unwrap(), t);
    }
    assert!(NotificationType::from_str("latency").is_err());
}

#[test]
fn test_project_is_kept_when_present() {
    let event = AlertEvent::experiment_warning(
        AlertPayload::Srm {
            experiment_id: "exp_1".to_string(),
            experiment_name: "Checkout".to_string(),
            threshold: 0.001,
        },
        EventUser::System,
        Some("prj_growth"),
        Vec::new(),
        Vec::new(),
    );
    assert_eq!(event.projects, vec!["prj_growth".to_string()]);
    assert!(!event.contains_secrets);
}
