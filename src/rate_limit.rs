//! Fixed-window rate limiter keyed by caller identity.
//!
//! Each identity key owns a counter and a window-start timestamp. The counter
//! resets wholesale once the window elapses; within a window the limiter
//! admits up to `max_count` requests and denies the rest without touching
//! state. This is deliberately a fixed-window counter, not a sliding log:
//! a caller can burst up to `2 x max_count` requests across a window
//! boundary, and that behavior is load-bearing (tested).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

/// Window granularity for the rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    #[must_use]
    pub fn length(self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(60 * 60),
            Self::Day => Duration::from_secs(60 * 60 * 24),
        }
    }
}

/// Admission policy applied to every identity key.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RatePolicy {
    /// When false, `admit` always allows without touching state.
    pub enabled: bool,
    /// Maximum admissions per window.
    pub max_count: u32,
    /// Window length.
    pub window: WindowKind,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Denied; `retry_after` is the time remaining in the current window.
    Denied { retry_after: Duration },
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counter, one window per identity key.
///
/// All windows live behind a single mutex, so the read-modify-write for a
/// key is atomic: two concurrent requests under the same identity cannot
/// both observe the last free admission slot.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    policy: RatePolicy,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check admission for `key` under the configured policy.
    pub fn admit(&self, key: &str) -> Admission {
        if !self.policy.enabled {
            return Admission::Allowed;
        }
        self.admit_at(key, Instant::now())
    }

    fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let window_length = self.policy.window.length();
        let mut guard = self.windows.lock().unwrap();

        let Some(window) = guard.get_mut(key) else {
            // First request for this key.
            guard.insert(
                key.to_string(),
                RateWindow {
                    count: 1,
                    window_start: now,
                },
            );
            return Admission::Allowed;
        };

        let elapsed = now.duration_since(window.window_start);
        if elapsed > window_length {
            window.count = 1;
            window.window_start = now;
            return Admission::Allowed;
        }

        if window.count >= self.policy.max_count {
            // State is left untouched on denial.
            return Admission::Denied {
                retry_after: window_length - elapsed,
            };
        }

        window.count += 1;
        Admission::Allowed
    }

    /// Drop windows whose period has fully elapsed. Absence of a window is
    /// equivalent to "no prior requests", so this is purely a memory bound.
    pub fn purge_elapsed(&self) -> usize {
        self.purge_elapsed_at(Instant::now())
    }

    fn purge_elapsed_at(&self, now: Instant) -> usize {
        let window_length = self.policy.window.length();
        let mut guard = self.windows.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, w| now.duration_since(w.window_start) <= window_length);
        before - guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(enabled: bool, max_count: u32) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RatePolicy {
            enabled,
            max_count,
            window: WindowKind::Minute,
        })
    }

    fn window_count(limiter: &FixedWindowLimiter, key: &str) -> u32 {
        limiter.windows.lock().unwrap().get(key).unwrap().count
    }

    #[test]
    fn test_admit_until_limit_then_deny() {
        let limiter = limiter(true, 3);

        assert_eq!(limiter.admit("k"), Admission::Allowed);
        assert_eq!(limiter.admit("k"), Admission::Allowed);
        assert_eq!(limiter.admit("k"), Admission::Allowed);
        assert!(matches!(limiter.admit("k"), Admission::Denied { .. }));

        // Denial leaves the counter untouched.
        assert_eq!(window_count(&limiter, "k"), 3);
    }

    #[test]
    fn test_window_reset_restarts_count() {
        let limiter = limiter(true, 3);
        let start = Instant::now();

        for _ in 0..3 {
            assert_eq!(limiter.admit_at("k", start), Admission::Allowed);
        }
        assert!(matches!(limiter.admit_at("k", start), Admission::Denied { .. }));

        // One tick past the window boundary: admitted again, count restarts.
        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.admit_at("k", later), Admission::Allowed);
        assert_eq!(window_count(&limiter, "k"), 1);
    }

    #[test]
    fn test_boundary_burst_is_fixed_window_semantics() {
        // A full window's quota immediately before the boundary plus a full
        // quota immediately after: 2 x max_count admissions total.
        let limiter = limiter(true, 3);
        let start = Instant::now();

        for _ in 0..3 {
            assert_eq!(limiter.admit_at("k", start + Duration::from_secs(59)), Admission::Allowed);
        }
        let after = start + Duration::from_secs(121);
        for _ in 0..3 {
            assert_eq!(limiter.admit_at("k", after), Admission::Allowed);
        }
        assert!(matches!(limiter.admit_at("k", after), Admission::Denied { .. }));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(true, 1);

        assert_eq!(limiter.admit("a"), Admission::Allowed);
        assert_eq!(limiter.admit("b"), Admission::Allowed);
        assert!(matches!(limiter.admit("a"), Admission::Denied { .. }));
    }

    #[test]
    fn test_disabled_policy_never_denies_or_records() {
        let limiter = limiter(false, 1);

        for _ in 0..10 {
            assert_eq!(limiter.admit("k"), Admission::Allowed);
        }
        assert!(limiter.windows.lock().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_admissions_grant_exactly_one_slot() {
        let limiter = Arc::new(limiter(true, 1));
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.admit("shared"))
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a == Admission::Allowed)
            .count();

        assert_eq!(allowed, 1);
    }

    #[test]
    fn test_purge_elapsed_drops_only_stale_windows() {
        let limiter = limiter(true, 3);
        let start = Instant::now();
        let _ = limiter.admit_at("stale", start);
        let _ = limiter.admit_at("fresh", start + Duration::from_secs(100));

        assert_eq!(limiter.purge_elapsed_at(start + Duration::from_secs(100)), 1);
        assert_eq!(window_count(&limiter, "fresh"), 1);
    }
}
