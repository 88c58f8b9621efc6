//! Sliding-window rate limiter
//!
//! Each key keeps the instants of its admitted calls inside the trailing
//! window. Keys never interact.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Per-key sliding-window admission counter
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    entries: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Admit at most `max_calls` per key within any `window`
    pub fn new(max_calls: usize, window: Duration) -> Self {
        RateLimiter {
            max_calls,
            window,
            entries: HashMap::new(),
        }
    }

    /// Admit or reject one call for `key` now
    pub fn allow(&mut self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Admit or reject one call for `key` at `now`
    pub fn allow_at(&mut self, key: &str, now: Instant) -> bool {
        let window = self.window;
        let stamps = self.entries.entry(key.to_string()).or_default();
        prune(stamps, now, window);

        if stamps.len() < self.max_calls {
            stamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// How long until `key` admits another call, if it is saturated
    pub fn retry_after(&self, key: &str, now: Instant) -> Option<Duration> {
        let stamps = self.entries.get(key)?;
        if stamps.len() < self.max_calls {
            return None;
        }
        let oldest = stamps.front()?;
        Some(self.window.saturating_sub(now.duration_since(*oldest)))
    }

    /// Drop keys with no admissions left inside the window
    pub fn cleanup(&mut self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&mut self, now: Instant) {
        let window = self.window;
        self.entries.retain(|_, stamps| {
            prune(stamps, now, window);
            !stamps.is_empty()
        });
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = stamps.front() {
        if now.duration_since(*oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_past_max() {
        let mut limiter = RateLimiter::new(100, Duration::from_secs(60));
        let start = Instant::now();
        for i in 0..100 {
            assert!(limiter.allow_at("tool:screeps_console", start + Duration::from_millis(i)));
        }
        assert!(!limiter.allow_at("tool:screeps_console", start + Duration::from_secs(59)));
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.allow_at("k", start));
        assert!(limiter.allow_at("k", start + Duration::from_secs(5)));
        assert!(!limiter.allow_at("k", start + Duration::from_secs(9)));

        // The first admission has aged out
        assert!(limiter.allow_at("k", start + Duration::from_secs(10)));
        assert!(!limiter.allow_at("k", start + Duration::from_secs(11)));
        assert!(limiter.allow_at("k", start + Duration::from_secs(15)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
    }

    #[test]
    fn test_retry_after() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.retry_after("a", now), None);
        limiter.allow_at("a", now);
        assert_eq!(
            limiter.retry_after("a", now + Duration::from_secs(20)),
            Some(Duration::from_secs(40))
        );
    }

    #[test]
    fn test_cleanup_drops_idle_keys() {
        let mut limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        limiter.allow_at("old", start);
        limiter.allow_at("fresh", start + Duration::from_secs(50));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.cleanup_at(start + Duration::from_secs(61));
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.cleanup_at(start + Duration::from_secs(200));
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
