mod common;

use std::collections::VecDeque;
use std::time::Duration;

use alarm_bridge::{
    Config, Dispatcher, EntityChange, EntityId, EntitySource, EventGateway, Rule, Settings, Target,
    UpstreamError,
};
use async_trait::async_trait;
use serde_json::json;

use common::{Behavior, FakeTarget};

/// Replays a fixed list of changes, then ends.
#[derive(Default)]
struct ScriptedSource {
    subscribed: Vec<EntityId>,
    changes: VecDeque<EntityChange>,
    fail_at_end: bool,
}

#[async_trait]
impl EntitySource for ScriptedSource {
    async fn subscribe(&mut self, entity: EntityId) -> Result<(), UpstreamError> {
        self.subscribed.push(entity);
        Ok(())
    }

    async fn next_change(&mut self) -> Result<Option<EntityChange>, UpstreamError> {
        match self.changes.pop_front() {
            Some(change) => Ok(Some(change)),
            None if self.fail_at_end => Err(UpstreamError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))),
            None => Ok(None),
        }
    }
}

fn gateway(hook: &FakeTarget, entities: Vec<EntityId>) -> EventGateway {
    let config = Config::new(
        Settings {
            cooldown: Duration::from_secs(60),
            ..Settings::default()
        },
        vec![Target::new("webhook1", hook.url("/"))],
        vec![
            Rule::new("rust_smart_alarm_on", ["webhook1"]),
            Rule::new("rust_smart_alarm_off", ["webhook1"]),
        ],
    )
    .unwrap();
    EventGateway::new(entities, Dispatcher::new(config))
}

#[tokio::test]
async fn test_run_subscribes_then_dispatches_admitted_changes() {
    let hook = FakeTarget::spawn(Behavior::ok()).await;
    let gw = gateway(&hook, vec![EntityId(42), EntityId(43)]);

    let mut source = ScriptedSource {
        changes: VecDeque::from(vec![
            EntityChange::new(EntityId(42), true),
            EntityChange::new(EntityId(42), true),
            EntityChange::new(EntityId(42), false),
            EntityChange::new(EntityId(99), true),
            EntityChange::new(EntityId(43), 1),
        ]),
        ..ScriptedSource::default()
    };

    gw.run(&mut source).await.unwrap();

    assert_eq!(source.subscribed, vec![EntityId(42), EntityId(43)]);

    let mut seen: Vec<(String, serde_json::Value)> = hook
        .requests()
        .iter()
        .map(|r| {
            let body = r.json();
            (body["event"].as_str().unwrap().to_string(), body["data"].clone())
        })
        .collect();
    seen.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.to_string().cmp(&b.1.to_string())));

    assert_eq!(
        seen,
        vec![
            ("rust_smart_alarm_off".to_string(), json!({"alarm_entity_id": 42, "value": false})),
            ("rust_smart_alarm_on".to_string(), json!({"alarm_entity_id": 42, "value": true})),
            ("rust_smart_alarm_on".to_string(), json!({"alarm_entity_id": 43, "value": true})),
        ]
    );
}

#[tokio::test]
async fn test_upstream_failure_is_returned_after_in_flight_dispatches() {
    let hook = FakeTarget::spawn(Behavior::slow(Duration::from_millis(100))).await;
    let gw = gateway(&hook, vec![EntityId(7)]);

    let mut source = ScriptedSource {
        changes: VecDeque::from(vec![EntityChange::new(EntityId(7), true)]),
        fail_at_end: true,
        ..ScriptedSource::default()
    };

    let err = gw.run(&mut source).await.unwrap_err();

    assert!(matches!(err, UpstreamError::Io(_)));
    assert_eq!(hook.request_count(), 1);
}

#[tokio::test]
async fn test_on_event_reports_dispatch_result() {
    let hook = FakeTarget::spawn(Behavior::ok()).await;
    let gw = gateway(&hook, vec![EntityId(5)]);

    let result = gw.on_event(EntityId(5), &json!(true)).await.unwrap();
    assert!(result.ok);
    assert_eq!(result.forwarded[0].status, Some(200));

    assert!(gw.on_event(EntityId(5), &json!(true)).await.is_none());
    assert_eq!(hook.request_count(), 1);
}
