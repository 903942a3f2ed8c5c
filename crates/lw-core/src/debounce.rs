use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Trailing-edge debouncer keyed by path (or any hashable key).
///
/// Every `record` pushes the key's deadline out by `window`; `drain_ready`
/// yields each key once its window has elapsed with no further events. A
/// burst of events for one key therefore produces exactly one downstream
/// action, carrying the state observed after the burst settled.
#[derive(Debug)]
pub struct Debouncer<K> {
    window: Duration,
    pending: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event at `now`, restarting the key's window.
    pub fn record(&mut self, key: K, now: Instant) {
        self.pending.insert(key, now);
    }

    /// Remove and return every key whose last event is at least `window` old.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<K> {
        let window = self.window;
        let ready: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= window)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &ready {
            self.pending.remove(key);
        }
        ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
