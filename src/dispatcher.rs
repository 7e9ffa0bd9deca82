use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::FailureReason;
use crate::forwarder::Forwarder;
use crate::telemetry::{metric_inc, metric_inc_event};
use crate::types::{now_secs, DeliveryResult, DispatchResult, TargetName};

/// Routes events to the targets of their rule.
///
/// A dispatch spawns one delivery task per rule target and joins them all
/// in rule order, so the aggregated result keeps that order no matter
/// which delivery finishes first. A failing or panicking delivery never
/// cancels its siblings.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    forwarder: Forwarder,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        let forwarder = Forwarder::new(&config.settings);
        Self::with_forwarder(Arc::new(config), forwarder)
    }

    pub fn with_forwarder(config: Arc<Config>, forwarder: Forwarder) -> Self {
        Self { config, forwarder }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Fan `data` out to every target of the rule for `event_kind`.
    ///
    /// A missing rule is reported in the result and issues no request.
    pub async fn dispatch(&self, event_kind: &str, data: Value) -> DispatchResult {
        let Some(rule) = self.config.rule(event_kind) else {
            metric_inc("bridge.dispatch.no_rule");
            let result = DispatchResult::no_rule(event_kind);
            tracing::warn!(event = event_kind, "no rule for event, nothing forwarded");
            return result;
        };

        let payload = Arc::new(build_payload(
            event_kind,
            now_secs(),
            data,
            rule.payload_template.as_ref(),
        ));

        let pending: Vec<(TargetName, JoinHandle<DeliveryResult>)> = rule
            .targets
            .iter()
            .map(|name| (name.clone(), self.spawn_delivery(name, payload.clone())))
            .collect();

        let mut forwarded = Vec::with_capacity(pending.len());
        for (name, handle) in pending {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(target_name = %name, error = %err, "delivery task did not complete");
                    DeliveryResult::failed(name, FailureReason::Aborted.to_string())
                }
            };
            forwarded.push(result);
        }

        let result = DispatchResult::from_results(forwarded);
        log_outcome(event_kind, &result);
        result
    }

    fn spawn_delivery(&self, name: &TargetName, payload: Arc<Value>) -> JoinHandle<DeliveryResult> {
        let forwarder = self.forwarder.clone();
        let target = self.config.target(name).cloned();
        let name = name.clone();

        tokio::spawn(async move {
            match target {
                Some(target) => forwarder.deliver(&target, &payload).await,
                // Unreachable for a validated Config.
                None => DeliveryResult::failed(name, "unknown target"),
            }
        })
    }
}

/// Build the outbound payload for one dispatch.
///
/// The base object is `{event, timestamp, data}`. Template fields are then
/// written over it key by key, so a template key equal to a base key
/// replaces the base value.
pub fn build_payload(
    event_kind: &str,
    timestamp: u64,
    data: Value,
    template: Option<&Map<String, Value>>,
) -> Value {
    let mut payload = Map::new();
    payload.insert("event".to_string(), Value::from(event_kind));
    payload.insert("timestamp".to_string(), Value::from(timestamp));
    payload.insert("data".to_string(), data);

    if let Some(template) = template {
        for (key, value) in template {
            payload.insert(key.clone(), value.clone());
        }
    }

    Value::Object(payload)
}

fn log_outcome(event_kind: &str, result: &DispatchResult) {
    for delivery in &result.forwarded {
        if delivery.ok {
            tracing::info!(
                event = event_kind,
                target_name = %delivery.target,
                status = delivery.status,
                attempts = delivery.attempts,
                "forwarded"
            );
        } else {
            tracing::warn!(
                event = event_kind,
                target_name = %delivery.target,
                status = delivery.status,
                attempts = delivery.attempts,
                error = delivery.error.as_deref().unwrap_or("unknown error"),
                "forward failed"
            );
        }
    }

    if result.ok {
        metric_inc_event("bridge.dispatch.ok", event_kind);
        tracing::info!(event = event_kind, targets = result.forwarded.len(), "dispatch ok");
    } else {
        metric_inc_event("bridge.dispatch.failed", event_kind);
        let failed = result.forwarded.iter().filter(|r| !r.ok).count();
        tracing::warn!(
            event = event_kind,
            targets = result.forwarded.len(),
            failed,
            "dispatch failed"
        );
    }
}
