use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::EntityId;

/// Suppresses repeated fires of the same (entity, event kind) pair.
///
/// Each key remembers when it was last admitted. A fire arriving within
/// the window of that instant is rejected without touching the stored
/// timestamp. Keys are never evicted; they are drawn from the fixed set of
/// monitored entities times the event kinds.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_fire: DashMap<(EntityId, String), Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fire: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and records `now` when the pair is outside its
    /// cooldown window, `false` otherwise.
    ///
    /// The check and the update happen under the entry's shard lock, so
    /// concurrent callers for the same pair are serialized.
    pub fn admit(&self, entity: EntityId, event_kind: &str, now: Instant) -> bool {
        match self.last_fire.entry((entity, event_kind.to_string())) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < self.window {
                    return false;
                }
                entry.insert(now);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Last admitted instant for the pair, if any.
    pub fn last_fire(&self, entity: EntityId, event_kind: &str) -> Option<Instant> {
        self.last_fire
            .get(&(entity, event_kind.to_string()))
            .map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn second_fire_within_window_is_suppressed() {
        let tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();

        assert!(tracker.admit(EntityId(42), "alarm_on", t0));
        assert!(!tracker.admit(EntityId(42), "alarm_on", t0 + Duration::from_secs(9)));
    }

    #[test]
    fn fire_at_window_boundary_is_admitted() {
        let tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();

        assert!(tracker.admit(EntityId(42), "alarm_on", t0));
        assert!(tracker.admit(EntityId(42), "alarm_on", t0 + WINDOW));
    }

    #[test]
    fn suppressed_fire_does_not_extend_window() {
        let tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();

        assert!(tracker.admit(EntityId(1), "alarm_on", t0));
        assert!(!tracker.admit(EntityId(1), "alarm_on", t0 + Duration::from_secs(5)));
        assert_eq!(tracker.last_fire(EntityId(1), "alarm_on"), Some(t0));
        assert!(tracker.admit(EntityId(1), "alarm_on", t0 + Duration::from_secs(10)));
    }

    #[test]
    fn on_and_off_are_independent() {
        let tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();

        assert!(tracker.admit(EntityId(7), "alarm_on", t0));
        assert!(tracker.admit(EntityId(7), "alarm_off", t0));
        assert!(!tracker.admit(EntityId(7), "alarm_on", t0 + Duration::from_secs(1)));
        assert!(!tracker.admit(EntityId(7), "alarm_off", t0 + Duration::from_secs(1)));
    }

    #[test]
    fn entities_are_independent() {
        let tracker = CooldownTracker::new(WINDOW);
        let t0 = Instant::now();

        assert!(tracker.admit(EntityId(1), "alarm_on", t0));
        assert!(tracker.admit(EntityId(11), "alarm_on", t0));
    }

    #[test]
    fn zero_window_admits_everything() {
        let tracker = CooldownTracker::new(Duration::ZERO);
        let t0 = Instant::now();

        assert!(tracker.admit(EntityId(1), "alarm_on", t0));
        assert!(tracker.admit(EntityId(1), "alarm_on", t0));
    }

    #[test]
    fn concurrent_admits_for_one_key_admit_once() {
        let tracker = Arc::new(CooldownTracker::new(WINDOW));
        let now = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.admit(EntityId(3), "alarm_on", now))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }
}
