//! Hub orchestration end to end, over in-memory stores

mod common;

use common::{active_sensor, hub_with, hub_with_source, settle, FailingSource, Fixture};
use futures::StreamExt;
use hub_core::{NotificationLevel, Sensor, SensorId, StoreError};
use hub_engine::{HubError, RunnerError, SessionEvent};
use hub_rules::{Condition, Rule, RuleError, RuleStore, ValidRuleAction};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn lamp_payload() -> serde_json::Map<String, serde_json::Value> {
    let mut payload = serde_json::Map::new();
    payload.insert("on".into(), json!(true));
    payload
}

/// A thermometer, a lamp and a rule switching the lamp on above 25
fn setup() -> (Fixture, Sensor, Sensor, Rule) {
    let thermometer = active_sensor("10.0.1.1");
    let lamp = active_sensor("10.0.1.2");
    let rule = Rule::new(
        "hot",
        Condition::greater_than(thermometer.id, 25.0),
        ValidRuleAction::sensor(lamp.id, lamp_payload()),
    );
    let fixture = hub_with(vec![thermometer.clone(), lamp.clone()], vec![], vec![]);
    fixture.hub.create_listener(thermometer.clone());
    fixture.hub.create_listener(lamp.clone());
    (fixture, thermometer, lamp, rule)
}

#[tokio::test(start_paused = true)]
async fn test_created_rule_writes_to_device_on_rising_edge() {
    let (fixture, thermometer, _lamp, rule) = setup();
    fixture.hub.create_rule(rule.clone()).await.unwrap();
    assert!(fixture.hub.is_rule_running(rule.id));

    for value in [20.0, 26.0, 27.0, 22.0, 30.0] {
        fixture.hub.push_value(thermometer.id, value).await.unwrap();
        settle().await;
    }

    let writes = fixture.device.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].uri, "10.0.1.2");
    assert_eq!(writes[0].payload, json!({"on": true}));
    assert_eq!(fixture.rules.get(rule.id).await.unwrap().name, "hot");
}

#[tokio::test(start_paused = true)]
async fn test_pushed_values_are_recorded() {
    let (fixture, thermometer, _lamp, _rule) = setup();

    fixture.hub.push_value(thermometer.id, 21.5).await.unwrap();
    settle().await;

    assert_eq!(fixture.measurements.count(thermometer.id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_to_unknown_sensor() {
    let (fixture, _, _, _) = setup();
    let unknown = SensorId::new();

    let err = fixture.hub.push_value(unknown, 1.0).await.unwrap_err();
    assert!(matches!(err, HubError::UnknownSensor(id) if id == unknown));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_rule_is_not_stored() {
    let (fixture, _, _, mut rule) = setup();
    rule.name = String::new();

    let err = fixture.hub.create_rule(rule.clone()).await.unwrap_err();
    assert!(matches!(err, HubError::Rule(RuleError::Validation { field: "name", .. })));
    assert!(fixture.rules.get_all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rule_on_unregistered_sensor_does_not_start() {
    let (fixture, _, lamp, _) = setup();
    let rule = Rule::new(
        "ghost",
        Condition::less_than(SensorId::new(), 0.0),
        ValidRuleAction::sensor(lamp.id, lamp_payload()),
    );

    let err = fixture.hub.start_rule(rule.clone()).await.unwrap_err();
    assert!(matches!(
        err,
        HubError::Runner(RunnerError::MissingDependency { .. })
    ));
    assert!(!fixture.hub.is_rule_running(rule.id));
}

#[tokio::test(start_paused = true)]
async fn test_failed_listener_is_unregistered() {
    let broken = Sensor::new("10.0.1.9", 1);
    let lamp = active_sensor("10.0.1.2");
    let fixture = hub_with_source(
        Arc::new(FailingSource(500)),
        vec![broken.clone(), lamp.clone()],
        vec![],
        vec![],
    );
    fixture.hub.create_listener(broken.clone());
    fixture.hub.create_listener(lamp.clone());
    assert!(fixture.hub.listener(broken.id).is_some());

    // First poll happens after one refresh interval and fails for good
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(fixture.hub.listener(broken.id).is_none());
    assert!(fixture.hub.listener(lamp.id).is_some());

    let rule = Rule::new(
        "broken",
        Condition::greater_than(broken.id, 1.0),
        ValidRuleAction::sensor(lamp.id, lamp_payload()),
    );
    let err = fixture.hub.start_rule(rule).await.unwrap_err();
    assert!(matches!(
        err,
        HubError::Runner(RunnerError::MissingDependency { sensor_id, .. }) if sensor_id == broken.id
    ));
}

#[tokio::test(start_paused = true)]
async fn test_replacement_listener_survives_failed_predecessor() {
    let broken = Sensor::new("10.0.1.9", 1);
    let fixture = hub_with_source(Arc::new(FailingSource(503)), vec![broken.clone()], vec![], vec![]);
    fixture.hub.create_listener(broken.clone());

    // Swapped for a push-only listener before the old one polls
    fixture.hub.create_listener(broken.clone().active());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(fixture.hub.listener(broken.id).is_some());
    fixture.hub.push_value(broken.id, 3.0).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_update_restarts_from_false() {
    let (fixture, thermometer, _lamp, rule) = setup();
    let created = fixture.hub.create_rule(rule).await.unwrap();

    fixture.hub.push_value(thermometer.id, 30.0).await.unwrap();
    settle().await;
    assert_eq!(fixture.device.writes().len(), 1);

    // Same tree, new name: the restarted runner sees 30 and fires again
    let mut changed = created.clone();
    changed.name = "very hot".into();
    let updated = fixture.hub.update_rule(changed).await.unwrap();
    settle().await;

    assert_eq!(updated.version, 2);
    assert_eq!(fixture.device.writes().len(), 2);

    // A stale version is rejected and the running rule is left alone
    let err = fixture.hub.update_rule(created).await.unwrap_err();
    assert!(matches!(err, HubError::Store(StoreError::EditConflict { .. })));
    assert!(fixture.hub.is_rule_running(updated.id));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_rule_stops_firing() {
    let (fixture, thermometer, _lamp, rule) = setup();
    fixture.hub.create_rule(rule.clone()).await.unwrap();

    fixture.hub.delete_rule(rule.id).await.unwrap();
    assert!(!fixture.hub.is_rule_running(rule.id));

    fixture.hub.push_value(thermometer.id, 40.0).await.unwrap();
    settle().await;
    assert!(fixture.device.writes().is_empty());

    let err = fixture.hub.delete_rule(rule.id).await.unwrap_err();
    assert!(matches!(err, HubError::Store(StoreError::NotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_reconfigured_listener_keeps_rules_running() {
    let (fixture, thermometer, _lamp, rule) = setup();
    fixture.hub.create_rule(rule.clone()).await.unwrap();

    let renamed = thermometer.clone().with_name("hallway");
    fixture.hub.reconfigure_listener(renamed).await;
    assert!(fixture.hub.is_rule_running(rule.id));

    fixture.hub.push_value(thermometer.id, 28.0).await.unwrap();
    settle().await;
    assert_eq!(fixture.device.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_starts_stored_sensors_and_rules() {
    let thermometer = active_sensor("10.0.2.1");
    let lamp = active_sensor("10.0.2.2");
    let rule = Rule::new(
        "cold",
        Condition::less_than(thermometer.id, 5.0),
        ValidRuleAction::sensor(lamp.id, lamp_payload()),
    );
    let orphan = Rule::new(
        "orphan",
        Condition::less_than(SensorId::new(), 5.0),
        ValidRuleAction::sensor(lamp.id, lamp_payload()),
    );
    let fixture = hub_with(
        vec![thermometer.clone(), lamp],
        vec![],
        vec![rule.clone(), orphan.clone()],
    );

    fixture.hub.bootstrap().await.unwrap();
    assert!(fixture.hub.listener(thermometer.id).is_some());
    assert!(fixture.hub.is_rule_running(rule.id));
    assert!(!fixture.hub.is_rule_running(orphan.id));

    fixture.hub.push_value(thermometer.id, 1.0).await.unwrap();
    settle().await;
    assert_eq!(fixture.device.writes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_streams_readings_and_notifications() {
    let (fixture, thermometer, _lamp, rule) = setup();
    fixture.hub.create_rule(rule).await.unwrap();

    let (session, handle) = fixture.hub.open_session().await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let forward = tokio::spawn(async move {
        let mut events = Box::pin(session.into_stream());
        while let Some(event) = events.next().await {
            if tx.send(event).is_err() {
                break;
            }
        }
    });

    handle.subscribe(thermometer.id);
    handle.subscribe(thermometer.id);
    settle().await;

    fixture.hub.push_value(thermometer.id, 26.0).await.unwrap();
    settle().await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    // One reading despite the duplicate subscribe, plus the rule's notification
    let readings: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Reading { .. }))
        .collect();
    assert_eq!(
        readings,
        vec![&SessionEvent::Reading {
            sensor_id: thermometer.id,
            value: Some(26.0),
        }]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Notification(n) if n.level == NotificationLevel::Success
    )));

    handle.unsubscribe(thermometer.id);
    settle().await;
    fixture.hub.push_value(thermometer.id, 27.0).await.unwrap();
    settle().await;
    assert!(rx.try_recv().is_err());

    handle.close();
    forward.await.unwrap();
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_session_ignores_unregistered_sensor() {
    let (fixture, thermometer, _, _) = setup();
    let (mut session, handle) = fixture.hub.open_session().await.unwrap();

    handle.subscribe(SensorId::new());
    handle.subscribe(thermometer.id);
    handle.unsubscribe(SensorId::new());

    // Nothing to deliver yet; this only lets the session apply its commands
    let waited = tokio::time::timeout(Duration::from_millis(5), session.next()).await;
    assert!(waited.is_err());
    assert_eq!(session.subscriptions(), vec![thermometer.id]);

    handle.close();
    assert_eq!(session.next().await, None);
    assert_eq!(session.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_sessions_and_runners() {
    let (fixture, _, _, rule) = setup();
    fixture.hub.create_rule(rule.clone()).await.unwrap();
    let (mut session, _handle) = fixture.hub.open_session().await.unwrap();

    fixture.hub.shutdown().await;

    assert!(!fixture.hub.is_rule_running(rule.id));
    assert_eq!(session.next().await, None);
}
