//! Forwards entity state changes to HTTP targets.
//!
//! An upstream source reports state changes of monitored entities
//! (smart alarms, switches). Each change becomes an *on* or *off* event,
//! passes a per-(entity, event) cooldown, and is fanned out to every
//! target of the matching rule.
//!
//! ## Guarantees
//! - Bounded outbound concurrency, shared by all targets
//! - Per-target isolation: a slow or failing target never blocks others
//! - Bounded retries with exponential backoff
//! - Every delivery outcome is logged
//!
//! ## Non-Guarantees
//! - Durability across restarts
//! - Exactly-once delivery
//! - Persistent delivery history

mod config;
mod cooldown;
mod dispatcher;
mod error;
mod forwarder;
mod gateway;
mod signing;
mod source;
mod telemetry;
mod types;

pub use config::Config;
pub use cooldown::CooldownTracker;
pub use dispatcher::{build_payload, Dispatcher};
pub use error::{ConfigError, FailureReason, UpstreamError};
pub use forwarder::{Forwarder, RetryPolicy, BODY_SNIPPET_CHARS};
pub use gateway::{EventGateway, EventKinds};
pub use signing::{compute_signature, verify_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use source::{
    is_truthy,
    parse_entity_ids,
    EntityChange,
    EntitySource,
    RelaySource,
    UpstreamSettings,
};
pub use types::{
    DeliveryResult,
    DispatchResult,
    EntityId,
    HttpMethod,
    Rule,
    Settings,
    Target,
    TargetName,
};
