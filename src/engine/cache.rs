//! TTL response cache.
//!
//! Lazy expiry: an entry past its deadline is never returned and is removed
//! when touched. `purge_expired` lets the periodic sweep bound memory for keys
//! nobody reads again. With a capacity set, the oldest inserted entries are
//! evicted first once the bound is exceeded.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

/// In-memory key/value cache with per-entry TTL.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order as (seq, key); stale pairs are skipped on eviction.
    order: VecDeque<(u64, String)>,
    default_ttl: Duration,
    capacity: Option<usize>,
    next_seq: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration, capacity: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            default_ttl,
            capacity,
            next_seq: 0,
        }
    }

    /// Get a live value, evicting it if it has expired.
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => now >= entry.expires_at,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store with the default TTL.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let ttl = self.default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                seq,
            },
        );
        self.order.push_back((seq, key));
        self.enforce_capacity();
    }

    fn enforce_capacity(&mut self) {
        // Overwrites leave stale order pairs behind.
        if self.order.len() > self.entries.len() * 2 + 16 {
            self.compact_order();
        }
        let Some(capacity) = self.capacity else {
            return;
        };

        while self.entries.len() > capacity {
            let Some((seq, key)) = self.order.pop_front() else {
                break;
            };
            let live = self.entries.get(&key).is_some_and(|entry| entry.seq == seq);
            if live {
                self.entries.remove(&key);
                tracing::trace!("cache_evicted: key={}", key);
            }
        }
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(seq, key)| entries.get(key).is_some_and(|entry| entry.seq == *seq));
    }

    /// Remove a single key.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.compact_order();
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
