//! Sliding-window occurrence counting keyed by player or item.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Counts occurrences per key over a trailing time window. Entries older
/// than the window are pruned whenever their key is touched.
#[derive(Debug)]
pub struct SlidingWindow<K> {
    entries: HashMap<K, VecDeque<DateTime<Utc>>>,
    window: Duration,
}

impl<K: Eq + Hash> SlidingWindow<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Records an occurrence at `at` and returns how many occurrences for
    /// `key`, this one included, fall inside the window ending at `at`.
    pub fn record(&mut self, key: K, at: DateTime<Utc>) -> usize {
        let window = self.window;
        let times = self.entries.entry(key).or_default();
        times.retain(|seen| at.signed_duration_since(*seen) <= window);
        times.push_back(at);
        times.len()
    }

    /// Drops expired occurrences for every key and forgets idle keys.
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.entries.retain(|_, times| {
            times.retain(|seen| now.signed_duration_since(*seen) <= window);
            !times.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
