use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// Per-label cooldown. A label may fire again once `cooldown` has elapsed since
/// it last fired; a label that has never fired always fires.
///
/// Shared by reference (`Arc<AlertThrottle>`) between every producer in the
/// process. The check and the update for one label happen while holding that
/// label's entry lock, so concurrent callers cannot both pass for the same label.
#[derive(Debug)]
pub struct AlertThrottle {
    cooldown: Duration,
    last_fired: DashMap<String, Instant>,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: DashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns true and records `now` if `label` is outside its cooldown window.
    pub fn should_fire(&self, label: &str, now: Instant) -> bool {
        match self.last_fired.entry(label.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
            Entry::Occupied(mut entry) => {
                // saturating: a `now` older than the record counts as zero elapsed
                if now.saturating_duration_since(*entry.get()) >= self.cooldown {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time left before `label` may fire again, zero if it may fire now.
    pub fn remaining(&self, label: &str, now: Instant) -> Duration {
        self.last_fired
            .get(label)
            .map(|last| self.cooldown.saturating_sub(now.saturating_duration_since(*last)))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const COOLDOWN: Duration = Duration::from_secs(30);

    #[test]
    fn first_detection_of_a_label_fires() {
        let throttle = AlertThrottle::new(COOLDOWN);
        assert!(throttle.should_fire("fire", Instant::now()));
    }

    #[test]
    fn second_detection_inside_cooldown_is_suppressed() {
        let throttle = AlertThrottle::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(throttle.should_fire("fire", t0));
        assert!(!throttle.should_fire("fire", t0 + Duration::from_secs(29)));
        assert_eq!(
            throttle.remaining("fire", t0 + Duration::from_secs(29)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn detection_after_cooldown_fires_again() {
        let throttle = AlertThrottle::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(throttle.should_fire("fire", t0));
        assert!(throttle.should_fire("fire", t0 + COOLDOWN));
        assert!(!throttle.should_fire("fire", t0 + COOLDOWN + Duration::from_secs(1)));
        assert!(throttle.should_fire("fire", t0 + COOLDOWN * 2));
    }

    #[test]
    fn suppressed_attempt_does_not_extend_the_window() {
        let throttle = AlertThrottle::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(throttle.should_fire("smoke", t0));
        assert!(!throttle.should_fire("smoke", t0 + Duration::from_secs(20)));
        assert!(throttle.should_fire("smoke", t0 + Duration::from_secs(30)));
    }

    #[test]
    fn labels_are_throttled_independently() {
        let throttle = AlertThrottle::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(throttle.should_fire("fire", t0));
        assert!(throttle.should_fire("smoke", t0));
        assert!(!throttle.should_fire("fire", t0));
        assert!(!throttle.should_fire("smoke", t0));
        assert_eq!(throttle.remaining("flame", t0), Duration::ZERO);
    }

    #[test]
    fn clock_going_backwards_does_not_fire() {
        let throttle = AlertThrottle::new(COOLDOWN);
        let t0 = Instant::now() + Duration::from_secs(60);
        assert!(throttle.should_fire("fire", t0));
        assert!(!throttle.should_fire("fire", t0 - Duration::from_secs(60)));
    }

    #[test]
    fn concurrent_callers_fire_exactly_once() {
        let throttle = Arc::new(AlertThrottle::new(COOLDOWN));
        let fired = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let throttle = throttle.clone();
                let fired = fired.clone();
                std::thread::spawn(move || {
                    if throttle.should_fire("fire", now) {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
