//! Process-local rolling-window rate limiter.
//!
//! Spec §8 is explicit that per-user rate counters are process-local and
//! non-durable, so this has no store-backed equivalent — a plain
//! `Mutex<HashMap<..>>` of timestamps per key, pruned lazily on each check.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RollingLimiter {
    limit: u32,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RollingLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key` and report whether it stays within the
    /// configured rate. A `limit` of 0 means unlimited.
    pub fn allow(&self, key: &str) -> bool {
        if self.limit == 0 {
            return true;
        }
        let now = Instant::now();
        let mut hits = self.hits.lock().unwrap();
        let entry = hits.entry(key.to_string()).or_default();
        while let Some(&front) = entry.front() {
            if now.duration_since(front) > self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() as u32 >= self.limit {
            return false;
        }
        entry.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_configured_limit() {
        let limiter = RollingLimiter::new(3, Duration::from_secs(3600));
        assert!(limiter.allow("u1"));
        assert!(limiter.allow("u1"));
        assert!(limiter.allow("u1"));
        assert!(!limiter.allow("u1"));
    }

    #[test]
    fn counters_are_independent_per_key() {
        let limiter = RollingLimiter::new(1, Duration::from_secs(3600));
        assert!(limiter.allow("u1"));
        assert!(limiter.allow("u2"));
        assert!(!limiter.allow("u1"));
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let limiter = RollingLimiter::new(0, Duration::from_secs(3600));
        for _ in 0..50 {
            assert!(limiter.allow("u1"));
        }
    }

    #[test]
    fn expired_hits_are_pruned_before_counting() {
        let limiter = RollingLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.allow("u1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allow("u1"));
    }
}
