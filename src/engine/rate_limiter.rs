//! Rate limiting and admission control.
//!
//! Fixed-window counter per key. The bucket key embeds the window slot
//! (`floor(now / window)`), so a new slot always starts a fresh bucket while
//! the previous one is simply abandoned until the sweep removes it.
//!
//! `reset_at` is computed as `now + window` when a bucket is created, not as
//! the slot boundary. Two calls in the same slot therefore never disagree on
//! the bucket, but the bucket's own reset deadline can lie past the slot end.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;

/// Default admission window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Per-window counter.
#[derive(Debug, Clone, Copy)]
struct RateBucket {
    count: u32,
    /// Epoch milliseconds.
    reset_at: i64,
}

/// Fixed-window rate limiter.
///
/// NOT a separate actor - owned by the execution engine and called via &mut self.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<String, RateBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Admit or deny one call for `key`. Records the call when admitted.
    pub fn check(&mut self, key: &str, limit: u32, window: Duration) -> bool {
        self.check_at(key, limit, window, Utc::now().timestamp_millis())
    }

    /// Same as [`check`](Self::check) with an explicit clock (epoch millis).
    pub fn check_at(&mut self, key: &str, limit: u32, window: Duration, now_ms: i64) -> bool {
        let window_ms = window_millis(window);
        let bucket_key = bucket_key(key, now_ms, window_ms);

        let bucket = self.buckets.entry(bucket_key).or_insert(RateBucket {
            count: 0,
            reset_at: now_ms + window_ms,
        });

        if now_ms > bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now_ms + window_ms;
        }

        if bucket.count >= limit {
            return false;
        }

        bucket.count += 1;
        true
    }

    /// Calls admitted so far in the current window for `key`.
    pub fn current_count(&self, key: &str, window: Duration) -> u32 {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window_millis(window);
        self.buckets
            .get(&bucket_key(key, now_ms, window_ms))
            .filter(|bucket| now_ms <= bucket.reset_at)
            .map_or(0, |bucket| bucket.count)
    }

    /// Drop buckets whose window has passed. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Utc::now().timestamp_millis())
    }

    pub fn sweep_at(&mut self, now_ms: i64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.reset_at >= now_ms);
        before - self.buckets.len()
    }

    /// Forget every bucket belonging to `key`.
    pub fn clear_key(&mut self, key: &str) {
        let prefix = format!("{}:", key);
        self.buckets.retain(|bucket_key, _| {
            !(bucket_key.starts_with(&prefix)
                && bucket_key[prefix.len()..].bytes().all(|b| b.is_ascii_digit()))
        });
    }

    /// Number of live or abandoned buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn bucket_key(key: &str, now_ms: i64, window_ms: i64) -> String {
    format!("{}:{}", key, now_ms.div_euclid(window_ms))
}
