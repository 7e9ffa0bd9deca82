use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::cooldown::CooldownTracker;
use crate::dispatcher::Dispatcher;
use crate::error::UpstreamError;
use crate::source::{is_truthy, EntitySource};
use crate::telemetry::metric_inc;
use crate::types::{DispatchResult, EntityId};

/// Event kinds emitted for the two states of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventKinds {
    pub on: String,
    pub off: String,
}

impl Default for EventKinds {
    fn default() -> Self {
        Self {
            on: "rust_smart_alarm_on".to_string(),
            off: "rust_smart_alarm_off".to_string(),
        }
    }
}

/// Turns raw entity changes into dispatches.
///
/// Each change is classified as the on or off kind, passed through the
/// cooldown tracker and, if admitted, handed to the dispatcher.
#[derive(Debug)]
pub struct EventGateway {
    entities: Vec<EntityId>,
    kinds: EventKinds,
    cooldown: CooldownTracker,
    dispatcher: Dispatcher,
}

impl EventGateway {
    /// The cooldown window comes from the dispatcher's settings.
    pub fn new(entities: Vec<EntityId>, dispatcher: Dispatcher) -> Self {
        let cooldown = CooldownTracker::new(dispatcher.config().settings.cooldown);
        Self {
            entities,
            kinds: EventKinds::default(),
            cooldown,
            dispatcher,
        }
    }

    pub fn with_event_kinds(mut self, kinds: EventKinds) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_cooldown(mut self, cooldown: CooldownTracker) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    pub fn event_kind(&self, on: bool) -> &str {
        if on {
            &self.kinds.on
        } else {
            &self.kinds.off
        }
    }

    /// Handle one change now. Returns `None` when the change was suppressed.
    pub async fn on_event(&self, entity: EntityId, value: &Value) -> Option<DispatchResult> {
        self.on_event_at(entity, value, Instant::now()).await
    }

    pub async fn on_event_at(
        &self,
        entity: EntityId,
        value: &Value,
        now: Instant,
    ) -> Option<DispatchResult> {
        let (kind, data) = self.admit(entity, value, now)?;
        Some(self.dispatcher.dispatch(&kind, data).await)
    }

    /// Subscribe to every configured entity, then dispatch changes until
    /// the source is exhausted.
    ///
    /// Dispatches run as independent tasks so a slow target never delays
    /// reading the next change. All in-flight dispatches are awaited
    /// before returning, including when the source fails.
    pub async fn run<S>(&self, source: &mut S) -> Result<(), UpstreamError>
    where
        S: EntitySource + ?Sized,
    {
        for entity in &self.entities {
            source.subscribe(*entity).await?;
            tracing::info!(entity = %entity, "subscribed");
        }
        tracing::info!(entities = self.entities.len(), "listening for entity changes");

        let mut in_flight = JoinSet::new();
        let outcome = loop {
            let change = match source.next_change().await {
                Ok(Some(change)) => change,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };

            if !self.entities.contains(&change.entity_id) {
                tracing::debug!(entity = %change.entity_id, "ignoring change for unmonitored entity");
                continue;
            }

            if let Some((kind, data)) = self.admit(change.entity_id, &change.value, Instant::now()) {
                let dispatcher = self.dispatcher.clone();
                in_flight.spawn(async move { dispatcher.dispatch(&kind, data).await });
            }

            while let Some(done) = in_flight.try_join_next() {
                log_join_error(done);
            }
        };

        while let Some(done) = in_flight.join_next().await {
            log_join_error(done);
        }

        if let Err(err) = &outcome {
            tracing::error!(error = %err, "upstream source failed");
        } else {
            tracing::info!("upstream source closed");
        }
        outcome
    }

    fn admit(&self, entity: EntityId, value: &Value, now: Instant) -> Option<(String, Value)> {
        let on = is_truthy(value);
        let kind = self.event_kind(on);
        let state = if on { "ON" } else { "OFF" };
        tracing::info!(entity = %entity, state, "entity changed");

        if !self.cooldown.admit(entity, kind, now) {
            metric_inc("bridge.cooldown.suppressed");
            tracing::debug!(entity = %entity, event = kind, "suppressed by cooldown");
            return None;
        }

        metric_inc("bridge.cooldown.admitted");
        let data = json!({
            "alarm_entity_id": entity,
            "value": on,
        });
        Some((kind.to_string(), data))
    }
}

fn log_join_error(done: Result<DispatchResult, tokio::task::JoinError>) {
    if let Err(err) = done {
        tracing::error!(error = %err, "dispatch task did not complete");
    }
}
