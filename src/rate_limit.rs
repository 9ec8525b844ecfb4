//! Process-local, fixed-window rate limiter for magic-link issuance.
//!
//! One independent window per source identifier (normally the client IP).
//! State lives only in this process and is lost on restart; cross-instance
//! coordination is an explicit non-goal.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Bucket used when no client IP can be derived. Conservative: all such
/// callers share one window.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Once the map holds this many sources, expired windows are swept before
/// admitting a new one. The source key comes from a client-supplied header,
/// so the map must not grow without bound under spoofed addresses.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

struct Window {
    count: u32,
    started: Instant,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn check(&self, source: &str) -> RateLimitDecision {
        self.check_at(source, Instant::now())
    }

    pub fn check_at(&self, source: &str, now: Instant) -> RateLimitDecision {
        if self.windows.len() >= SWEEP_THRESHOLD {
            self.sweep(now);
        }

        let mut entry = self
            .windows
            .entry(source.to_string())
            .or_insert_with(|| Window {
                count: 0,
                started: now,
            });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            entry.count = 1;
            entry.started = now;
            return RateLimitDecision {
                allowed: true,
                retry_after_secs: 0,
            };
        }

        entry.count += 1;
        if entry.count > self.max_requests {
            let remaining = self.window - elapsed;
            RateLimitDecision {
                allowed: false,
                retry_after_secs: remaining.as_secs().max(1),
            }
        } else {
            RateLimitDecision {
                allowed: true,
                retry_after_secs: 0,
            }
        }
    }

    /// Drop windows whose period has fully elapsed; they would be reset on
    /// the next check anyway. Called before taking any entry lock.
    fn sweep(&self, now: Instant) {
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_denies() {
        let limiter = RateLimiter::new(5, 3600);
        let now = Instant::now();
        for i in 0..5 {
            assert!(limiter.check_at("1.2.3.4", now).allowed, "request {}", i);
        }
        let sixth = limiter.check_at("1.2.3.4", now);
        assert!(!sixth.allowed);
        assert!(sixth.retry_after_secs > 0);
    }

    #[test]
    fn window_reset_allows_again() {
        let limiter = RateLimiter::new(2, 60);
        let now = Instant::now();
        limiter.check_at("ip", now);
        limiter.check_at("ip", now);
        assert!(!limiter.check_at("ip", now).allowed);
        let later = now + Duration::from_secs(61);
        assert!(limiter.check_at("ip", later).allowed);
    }

    #[test]
    fn sources_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
    }

    #[test]
    fn expired_windows_are_evicted_once_the_map_is_large() {
        let limiter = RateLimiter::new(5, 60);
        let now = Instant::now();
        for i in 0..SWEEP_THRESHOLD {
            limiter.check_at(&format!("10.{}.{}.1", i / 256, i % 256), now);
        }
        assert_eq!(limiter.windows.len(), SWEEP_THRESHOLD);

        // one source is still inside its window when the sweep runs
        let mid = now + Duration::from_secs(30);
        limiter.check_at("203.0.113.7", mid);

        let later = now + Duration::from_secs(61);
        limiter.check_at("198.51.100.9", later);
        assert_eq!(limiter.windows.len(), 2);
        assert!(limiter.windows.contains_key("203.0.113.7"));
        assert!(limiter.windows.contains_key("198.51.100.9"));
    }

    #[test]
    fn retry_after_reflects_remaining_window() {
        let limiter = RateLimiter::new(1, 100);
        let now = Instant::now();
        limiter.check_at("ip", now);
        let denied = limiter.check_at("ip", now + Duration::from_secs(40));
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 60);
    }
}
