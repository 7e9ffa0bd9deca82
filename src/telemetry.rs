//! Counter helpers. With the `metrics` feature disabled they compile to
//! no-ops so call sites stay unconditional.

use crate::types::TargetName;

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    ::metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc_target(name: &'static str, target: &TargetName) {
    ::metrics::increment_counter!(name, "target" => target.0.clone());
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc_target(_name: &'static str, _target: &TargetName) {}

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc_event(name: &'static str, event: &str) {
    ::metrics::increment_counter!(name, "event" => event.to_string());
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc_event(_name: &'static str, _event: &str) {}
