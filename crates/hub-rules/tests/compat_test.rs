//! Compatibility tests against persisted rule documents
//!
//! The JSON below mirrors records written by earlier versions of the hub,
//! including the legacy `"to"` action field and numbers stored without a
//! fractional part.

use hub_core::{MeasurementStore, SensorId, SequenceId, StoreResult};
use hub_rules::{
    ActionTarget, Condition, ConditionEvaluator, EvalContext, Rule, RuleError, Snapshot,
    TimeVariant, ValidRuleAction,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

struct NoHistory;

#[async_trait::async_trait]
impl MeasurementStore for NoHistory {
    async fn insert(&self, _: SensorId, _: chrono::DateTime<chrono::Utc>, _: f64) -> StoreResult<()> {
        Ok(())
    }

    async fn get_percentile(&self, _: SensorId, _: Duration, _: u8) -> StoreResult<f64> {
        Ok(0.0)
    }
}

fn sensor(raw: &str) -> SensorId {
    raw.parse().unwrap()
}

// ============================================================================
// Legacy documents
// ============================================================================

const LEGACY_RULE: &str = r#"{
    "id": "78c6e961-b410-4130-8254-50257b3d88f5",
    "description": "Nowa reguła",
    "internal": {
        "type": "or",
        "children": [
            {
                "type": "and",
                "children": [
                    {
                        "type": "lt",
                        "sensor_id": "7b55654c-fbd1-4054-9b93-228e8e7e8544",
                        "value": 5
                    },
                    {
                        "type": "gt",
                        "sensor_id": "7b55654c-fbd1-4054-9b93-228e8e7e8544",
                        "value": 4
                    }
                ]
            },
            {
                "wrapped": {
                    "sensor_id": "cfe7987c-5ca8-4ad1-8c1e-507ea937d71e",
                    "value": 8,
                    "type": "gt"
                },
                "type": "not"
            }
        ]
    },
    "on_valid": {
        "to": "3a415307-7845-4f05-a790-4e8e203a49c3",
        "payload": {
            "data": "loool"
        }
    }
}"#;

#[test]
fn test_compat_legacy_rule_decodes() {
    let rule: Rule = serde_json::from_str(LEGACY_RULE).unwrap();

    assert_eq!(rule.description, "Nowa reguła");
    assert_eq!(rule.on_valid.target_type, ActionTarget::Sensor);
    assert_eq!(
        rule.on_valid.target_id.to_string(),
        "3a415307-7845-4f05-a790-4e8e203a49c3"
    );
    assert_eq!(rule.on_valid.payload["data"], json!("loool"));
    assert_eq!(rule.version, 1);

    assert_eq!(
        rule.internal.dependencies(),
        BTreeSet::from([
            sensor("7b55654c-fbd1-4054-9b93-228e8e7e8544"),
            sensor("cfe7987c-5ca8-4ad1-8c1e-507ea937d71e"),
        ])
    );
}

#[test]
fn test_compat_legacy_rule_without_name_fails_validation() {
    let err = Rule::parse(LEGACY_RULE).unwrap_err();
    assert!(matches!(err, RuleError::Validation { field: "name", .. }));
}

#[tokio::test]
async fn test_compat_legacy_rule_evaluates() {
    let rule: Rule = serde_json::from_str(LEGACY_RULE).unwrap();
    let eval = ConditionEvaluator::new(Arc::new(NoHistory));
    let a = sensor("7b55654c-fbd1-4054-9b93-228e8e7e8544");
    let b = sensor("cfe7987c-5ca8-4ad1-8c1e-507ea937d71e");

    // 4 < a < 5 holds
    let snapshot = Snapshot::from([(a, 4.5), (b, 100.0)]);
    assert!(eval
        .evaluate(&rule.internal, &EvalContext::new(&snapshot))
        .await
        .unwrap());

    // Neither branch holds
    let snapshot = Snapshot::from([(a, 9.0), (b, 100.0)]);
    assert!(!eval
        .evaluate(&rule.internal, &EvalContext::new(&snapshot))
        .await
        .unwrap());

    // Second branch: b not above 8
    let snapshot = Snapshot::from([(a, 9.0), (b, 3.0)]);
    assert!(eval
        .evaluate(&rule.internal, &EvalContext::new(&snapshot))
        .await
        .unwrap());
}

// ============================================================================
// Every node type
// ============================================================================

#[test]
fn test_compat_every_node_type_round_trips() {
    let document = json!({
        "type": "and",
        "children": [
            {"type": "gt", "sensor_id": "7b55654c-fbd1-4054-9b93-228e8e7e8544", "value": 20.5},
            {"type": "lt", "sensor_id": "7b55654c-fbd1-4054-9b93-228e8e7e8544", "value": 30.0},
            {"type": "perc", "sensor_id": "cfe7987c-5ca8-4ad1-8c1e-507ea937d71e", "duration": "1h30m0s", "perc": 75},
            {"type": "time", "hour": 6, "minute": 45, "variant": "after"},
            {"type": "day", "format": "* 5-9 1-5"},
            {"type": "or", "children": [
                {"type": "not", "wrapped": {"type": "time", "hour": 22, "minute": 0, "variant": "before"}}
            ]}
        ]
    });

    let condition = Condition::from_value(document.clone()).unwrap();
    assert_eq!(serde_json::to_value(&condition).unwrap(), document);

    let Condition::And(and) = &condition else {
        panic!("expected and");
    };
    assert!(matches!(
        &and.children[2],
        Condition::Percentile(p) if p.duration == Duration::from_secs(5400) && p.perc == 75
    ));
    assert!(matches!(
        &and.children[3],
        Condition::TimeOfDay(t) if t.variant == TimeVariant::After
    ));
}

#[test]
fn test_compat_rule_round_trips() {
    let rule = Rule::new(
        "Heating",
        Condition::less_than(SensorId::new(), 19.0),
        ValidRuleAction::sequence(SequenceId::new()),
    )
    .with_description("Start heating below 19 degrees");

    let text = serde_json::to_string(&rule).unwrap();
    let back = Rule::parse(&text).unwrap();
    assert_eq!(back, rule);

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["on_valid"]["target_type"], json!("sequence"));
}

#[test]
fn test_compat_short_duration_forms() {
    let condition = Condition::from_value(json!({
        "type": "perc",
        "sensor_id": "7b55654c-fbd1-4054-9b93-228e8e7e8544",
        "duration": "90m",
        "perc": 50
    }))
    .unwrap();

    assert_eq!(
        serde_json::to_value(&condition).unwrap()["duration"],
        json!("1h30m0s")
    );
}

#[test]
fn test_compat_bad_day_format_is_parse_error() {
    let err = Condition::from_value(json!({"type": "day", "format": "* *"})).unwrap_err();
    assert!(matches!(err, RuleError::Parse(_)));

    let err = Condition::from_value(json!({"type": "day", "format": "32 * *"})).unwrap_err();
    assert!(matches!(err, RuleError::InvalidConfig(_)));
}
