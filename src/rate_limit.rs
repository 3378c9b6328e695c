use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::{RateLimitSettings, now_ms};

const SHARD_COUNT: usize = 16;

pub(crate) type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    failures: u32,
    window_start_ms: u64,
    locked_until_ms: Option<u64>,
}

/// Tracks failed authorization attempts per key and enforces temporary
/// lockout. State is in-memory only; losing it on restart fails open, which
/// is acceptable because this only defends against online guessing.
///
/// Keys are sharded so concurrent requests from different addresses do not
/// contend on one lock.
pub(crate) struct AuthRateLimiter {
    settings: RateLimitSettings,
    clock: ClockFn,
    shards: Vec<Mutex<HashMap<String, RateLimitEntry>>>,
}

impl AuthRateLimiter {
    pub(crate) fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(now_ms))
    }

    /// Constructor with an injected clock, so tests control time.
    pub(crate) fn with_clock(settings: RateLimitSettings, clock: ClockFn) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        AuthRateLimiter {
            settings,
            clock,
            shards,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, RateLimitEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Returns the remaining lockout in milliseconds when `key` is locked.
    /// Unknown keys are never locked. Stale entries are evicted here.
    pub(crate) fn check_locked(&self, key: &str) -> Option<u64> {
        let now = (self.clock)();
        let Ok(mut entries) = self.shard(key).lock() else {
            return None;
        };
        let Some(entry) = entries.get(key) else {
            return None;
        };
        if let Some(until) = entry.locked_until_ms {
            if until > now {
                return Some(until - now);
            }
            // Lockout elapsed with no further failures.
            entries.remove(key);
            return None;
        }
        if now.saturating_sub(entry.window_start_ms) > self.settings.window_ms {
            entries.remove(key);
        }
        None
    }

    pub(crate) fn record_failure(&self, key: &str) {
        let now = (self.clock)();
        let Ok(mut entries) = self.shard(key).lock() else {
            return;
        };
        let entry = entries.entry(key.to_string()).or_insert(RateLimitEntry {
            failures: 0,
            window_start_ms: now,
            locked_until_ms: None,
        });
        if now.saturating_sub(entry.window_start_ms) > self.settings.window_ms {
            entry.failures = 0;
            entry.window_start_ms = now;
        }
        entry.failures += 1;
        if entry.failures >= self.settings.max_failures {
            entry.locked_until_ms = Some(now + self.settings.lockout_ms);
        }
    }

    /// A successful authorization clears the key entirely; no partial credit.
    pub(crate) fn record_success(&self, key: &str) {
        if let Ok(mut entries) = self.shard(key).lock() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn limiter_at(settings: RateLimitSettings) -> (AuthRateLimiter, Arc<AtomicU64>) {
        let time = Arc::new(AtomicU64::new(1_000_000));
        let clock_time = time.clone();
        let limiter = AuthRateLimiter::with_clock(
            settings,
            Arc::new(move || clock_time.load(Ordering::SeqCst)),
        );
        (limiter, time)
    }

    fn settings(max_failures: u32) -> RateLimitSettings {
        RateLimitSettings {
            max_failures,
            window_ms: 60_000,
            lockout_ms: 300_000,
        }
    }

    #[test]
    fn unseen_keys_are_never_locked() {
        let (limiter, _) = limiter_at(settings(3));
        assert!(limiter.check_locked("10.0.0.1").is_none());
    }

    #[test]
    fn locks_after_max_failures_with_positive_retry_after() {
        let (limiter, _) = limiter_at(settings(3));
        limiter.record_failure("k");
        limiter.record_failure("k");
        assert!(limiter.check_locked("k").is_none());
        limiter.record_failure("k");
        let retry = limiter.check_locked("k").unwrap();
        assert!(retry > 0);
        assert!(retry <= 300_000);
    }

    #[test]
    fn success_resets_to_zero_failures() {
        let (limiter, _) = limiter_at(settings(3));
        limiter.record_failure("k");
        limiter.record_failure("k");
        limiter.record_failure("k");
        assert!(limiter.check_locked("k").is_some());

        limiter.record_success("k");
        assert!(limiter.check_locked("k").is_none());

        // Fresh count afterwards: two failures do not re-lock.
        limiter.record_failure("k");
        limiter.record_failure("k");
        assert!(limiter.check_locked("k").is_none());
    }

    #[test]
    fn lockout_expires_with_time() {
        let (limiter, time) = limiter_at(settings(1));
        limiter.record_failure("k");
        assert!(limiter.check_locked("k").is_some());

        time.fetch_add(300_001, Ordering::SeqCst);
        assert!(limiter.check_locked("k").is_none());
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let (limiter, time) = limiter_at(settings(2));
        limiter.record_failure("k");
        time.fetch_add(60_001, Ordering::SeqCst);
        limiter.record_failure("k");
        assert!(limiter.check_locked("k").is_none());
    }

    #[test]
    fn keys_are_independent() {
        let (limiter, _) = limiter_at(settings(1));
        limiter.record_failure("a");
        assert!(limiter.check_locked("a").is_some());
        assert!(limiter.check_locked("b").is_none());
    }
}
