//! Process-wide execution counters and per-tool latency histograms.
//!
//! Purely in-memory. `snapshot()` flattens everything into a
//! `name -> number` map for operators; `tool_stats()` gives a typed per-tool
//! report with error patterns.

use crate::types::ErrorCode;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Histogram bucket upper bounds in milliseconds.
pub const DURATION_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

// =============================================================================
// Histogram
// =============================================================================

/// Cumulative latency histogram.
#[derive(Debug, Clone, Default)]
struct DurationHistogram {
    /// One slot per bound plus `+Inf`.
    buckets: [u64; DURATION_BUCKETS_MS.len() + 1],
    count: u64,
    sum_ms: u64,
    min_ms: Option<u64>,
    max_ms: u64,
}

impl DurationHistogram {
    fn observe(&mut self, duration_ms: u64) {
        let slot = DURATION_BUCKETS_MS
            .iter()
            .position(|bound| duration_ms <= *bound)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.buckets[slot] += 1;
        self.count += 1;
        self.sum_ms += duration_ms;
        self.min_ms = Some(self.min_ms.map_or(duration_ms, |m| m.min(duration_ms)));
        self.max_ms = self.max_ms.max(duration_ms);
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ms as f64 / self.count as f64
    }
}

// =============================================================================
// Per-tool metrics
// =============================================================================

#[derive(Debug, Default)]
struct ToolMetrics {
    successes: u64,
    errors: u64,
    cache_hits: u64,
    durations: DurationHistogram,
    error_codes: HashMap<ErrorCode, u64>,
}

/// Typed per-tool report.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub tool: String,
    pub total_calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Error codes by frequency, most frequent first.
    pub error_patterns: Vec<(ErrorCode, u64)>,
}

// =============================================================================
// Gateway metrics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    tool_executions: u64,
    tool_successes: u64,
    tool_errors: u64,
    cache_hits: u64,
    cache_misses: u64,
    rate_limited: u64,
    retries: u64,
    timeouts: u64,
    coalesced: u64,
    tools: HashMap<String, ToolMetrics>,
}

/// Counters shared by every request handled by one engine.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    inner: Mutex<Counters>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A call for a registered tool entered the engine.
    pub fn record_call(&self) {
        self.inner.lock().tool_executions += 1;
    }

    pub fn record_success(&self, tool: &str, duration_ms: u64, from_cache: bool) {
        let mut c = self.inner.lock();
        c.tool_successes += 1;
        let metrics = c.tools.entry(tool.to_string()).or_default();
        metrics.successes += 1;
        metrics.durations.observe(duration_ms);
        if from_cache {
            metrics.cache_hits += 1;
        }
    }

    pub fn record_error(&self, tool: &str, code: ErrorCode, duration_ms: u64) {
        let mut c = self.inner.lock();
        c.tool_errors += 1;
        match code {
            ErrorCode::RateLimitExceeded => c.rate_limited += 1,
            ErrorCode::Timeout => c.timeouts += 1,
            _ => {}
        }
        let metrics = c.tools.entry(tool.to_string()).or_default();
        metrics.errors += 1;
        metrics.durations.observe(duration_ms);
        *metrics.error_codes.entry(code).or_default() += 1;
    }

    pub fn record_cache_hit(&self) {
        self.inner.lock().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.inner.lock().cache_misses += 1;
    }

    /// A failed attempt inside the retry loop (the call itself may still succeed).
    pub fn record_failed_attempt(&self, code: ErrorCode) {
        let mut c = self.inner.lock();
        c.retries += 1;
        if code == ErrorCode::Timeout {
            c.timeouts += 1;
        }
    }

    pub fn record_coalesced(&self) {
        self.inner.lock().coalesced += 1;
    }

    /// Flattened counter snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        let c = self.inner.lock();
        let mut out = BTreeMap::new();

        out.insert("tool_executions".to_string(), c.tool_executions as f64);
        out.insert("tool_successes".to_string(), c.tool_successes as f64);
        out.insert("tool_errors".to_string(), c.tool_errors as f64);
        out.insert("cache_hits".to_string(), c.cache_hits as f64);
        out.insert("cache_misses".to_string(), c.cache_misses as f64);
        out.insert("rate_limited".to_string(), c.rate_limited as f64);
        out.insert("retries".to_string(), c.retries as f64);
        out.insert("timeouts".to_string(), c.timeouts as f64);
        out.insert("coalesced".to_string(), c.coalesced as f64);

        for (tool, metrics) in &c.tools {
            let prefix = format!("tool_duration_ms.{}", tool);
            let h = &metrics.durations;
            out.insert(format!("{}.count", prefix), h.count as f64);
            out.insert(format!("{}.sum", prefix), h.sum_ms as f64);
            out.insert(format!("{}.avg", prefix), h.avg_ms());
            out.insert(format!("{}.min", prefix), h.min_ms.unwrap_or(0) as f64);
            out.insert(format!("{}.max", prefix), h.max_ms as f64);

            let mut cumulative = 0;
            for (bound, hits) in DURATION_BUCKETS_MS.iter().zip(h.buckets.iter()) {
                cumulative += hits;
                out.insert(format!("{}.le_{}", prefix, bound), cumulative as f64);
            }
            out.insert(format!("{}.le_inf", prefix), h.count as f64);
        }

        out
    }

    /// Typed report for one tool; `None` if it has never been called.
    pub fn tool_stats(&self, tool: &str) -> Option<ToolStats> {
        let c = self.inner.lock();
        let metrics = c.tools.get(tool)?;

        let total = metrics.successes + metrics.errors;
        let success_rate = if total == 0 {
            0.0
        } else {
            metrics.successes as f64 / total as f64
        };

        let mut error_patterns: Vec<(ErrorCode, u64)> =
            metrics.error_codes.iter().map(|(code, n)| (*code, *n)).collect();
        error_patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

        Some(ToolStats {
            tool: tool.to_string(),
            total_calls: total,
            successes: metrics.successes,
            errors: metrics.errors,
            cache_hits: metrics.cache_hits,
            success_rate,
            avg_latency_ms: metrics.durations.avg_ms(),
            min_latency_ms: metrics.durations.min_ms.unwrap_or(0),
            max_latency_ms: metrics.durations.max_ms,
            error_patterns,
        })
    }
}
