//! Retry-delivery dedup keyed on Slack's per-event id.
//!
//! Both Socket Mode and the HTTP Events API redeliver an event when the
//! previous delivery wasn't acknowledged fast enough. `event_id` is stable
//! across redeliveries on both ingress paths, unlike `X-Slack-Retry-Num`,
//! which only the HTTP path carries.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

const SEEN_CAPACITY: usize = 2048;

pub struct RetryDedup {
    seen: Mutex<LruCache<String, ()>>,
}

impl RetryDedup {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(LruCache::new(NonZeroUsize::new(SEEN_CAPACITY).unwrap())),
        }
    }

    /// `true` the first time `event_id` is seen, `false` on every repeat.
    pub fn first_delivery(&self, event_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        if seen.contains(event_id) {
            return false;
        }
        seen.put(event_id.to_string(), ());
        true
    }
}

impl Default for RetryDedup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delivery_true_once_then_false() {
        let dedup = RetryDedup::new();
        assert!(dedup.first_delivery("Ev0123ABC"));
        assert!(!dedup.first_delivery("Ev0123ABC"));
        assert!(!dedup.first_delivery("Ev0123ABC"));
    }

    #[test]
    fn distinct_ids_are_independent() {
        let dedup = RetryDedup::new();
        assert!(dedup.first_delivery("a"));
        assert!(dedup.first_delivery("b"));
    }
}
