//! Execution engine: the request state machine.
//!
//! ```text
//! RECEIVED → RATE_CHECK → CACHE_CHECK → VALIDATE → EXECUTE → CACHE_STORE → RESPOND
//!     │           │            │            │          │
//!     ▼           ▼            ▼ (hit)      ▼          ▼
//! TOOL_NOT_FOUND RATE_LIMITED RESPOND VALIDATION_FAILED EXECUTION_FAILED
//! ```
//!
//! The engine is `Send + Sync` and meant to be shared as
//! `Arc<ExecutionEngine>`. Its maps sit behind short synchronous locks that
//! are never held across an `.await`; suspension only happens inside
//! handlers and retry backoff.

pub mod cache;
pub mod cleanup;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod single_flight;

pub use cache::TtlCache;
pub use cleanup::{SweepService, SweepStats};
pub use metrics::{GatewayMetrics, ToolStats};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};

use crate::tools::{default_registry, ToolDescriptor, ToolRegistry, Validator};
use crate::types::{CallerId, Config, EngineConfig, Error, ExecutionId, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use single_flight::SingleFlight;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Reserved parameter that toggles the response cache for one call.
pub const USE_CACHE_PARAM: &str = "useCache";

// =============================================================================
// Request states
// =============================================================================

/// Stages of one execution, as reported in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Received,
    RateCheck,
    CacheCheck,
    Validate,
    Execute,
    CacheStore,
    Respond,
    ToolNotFound,
    RateLimited,
    ValidationFailed,
    ExecutionFailed,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Received => "RECEIVED",
            ExecutionState::RateCheck => "RATE_CHECK",
            ExecutionState::CacheCheck => "CACHE_CHECK",
            ExecutionState::Validate => "VALIDATE",
            ExecutionState::Execute => "EXECUTE",
            ExecutionState::CacheStore => "CACHE_STORE",
            ExecutionState::Respond => "RESPOND",
            ExecutionState::ToolNotFound => "TOOL_NOT_FOUND",
            ExecutionState::RateLimited => "RATE_LIMITED",
            ExecutionState::ValidationFailed => "VALIDATION_FAILED",
            ExecutionState::ExecutionFailed => "EXECUTION_FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Respond
                | ExecutionState::ToolNotFound
                | ExecutionState::RateLimited
                | ExecutionState::ValidationFailed
                | ExecutionState::ExecutionFailed
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(state: ExecutionState) {
    tracing::debug!("state_transition: state={}", state);
}

// =============================================================================
// Result
// =============================================================================

/// Uniform success envelope returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub tool: String,
    pub success: bool,
    pub result: Value,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub from_cache: bool,
    /// Joined an identical in-flight execution instead of running its own.
    pub coalesced: bool,
}

/// Cache key for `tool` called with `params`.
///
/// Object keys serialize in sorted order, so logically equal parameter maps
/// always produce the same key.
pub fn cache_key(tool: &str, params: &Value) -> String {
    format!("{}:{}", tool, params)
}

/// Remove the `useCache` switch from `params`. Only an explicit `false`
/// disables the cache.
fn take_use_cache(params: &mut Value) -> bool {
    params
        .as_object_mut()
        .and_then(|object| object.remove(USE_CACHE_PARAM))
        .map_or(true, |flag| flag != Value::Bool(false))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Engine
// =============================================================================

/// Executes registered tools behind admission control, caching, validation
/// and retries.
pub struct ExecutionEngine {
    registry: ToolRegistry,
    validator: Validator,
    retry: RetryExecutor,
    cache: Mutex<TtlCache<Value>>,
    limiter: Mutex<RateLimiter>,
    flights: SingleFlight<Value>,
    metrics: Arc<GatewayMetrics>,
    config: EngineConfig,
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("tools", &self.registry.names())
            .field("cache_entries", &self.cache.lock().len())
            .field("in_flight", &self.flights.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(registry: ToolRegistry, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            validator: Validator::new()?,
            retry: RetryExecutor::new(config.retry.clone()),
            cache: Mutex::new(TtlCache::new(config.default_cache_ttl, config.cache_capacity)),
            limiter: Mutex::new(RateLimiter::new()),
            flights: SingleFlight::new(),
            metrics: Arc::new(GatewayMetrics::new()),
            registry,
            config,
        })
    }

    /// Engine with the built-in tools, wired from a full configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = default_registry(&config.handlers)?;
        Self::new(registry, config.engine.clone())
    }

    /// Execute `name` with `params`. The rate-limit key is the tool name.
    pub async fn execute(&self, name: &str, params: Value) -> Result<ExecutionResult> {
        self.run_traced(None, name, params).await
    }

    /// Execute on behalf of `caller`; rate limits apply per `caller:tool`.
    pub async fn execute_for(
        &self,
        caller: &CallerId,
        name: &str,
        params: Value,
    ) -> Result<ExecutionResult> {
        self.run_traced(Some(caller), name, params).await
    }

    async fn run_traced(
        &self,
        caller: Option<&CallerId>,
        name: &str,
        params: Value,
    ) -> Result<ExecutionResult> {
        let execution_id = ExecutionId::new();
        let span = tracing::info_span!(
            "execute",
            execution_id = %execution_id,
            tool = %name,
            caller = caller.map(CallerId::as_str).unwrap_or("-"),
        );
        self.run(execution_id, caller, name, params)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        execution_id: ExecutionId,
        caller: Option<&CallerId>,
        name: &str,
        mut params: Value,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();

        // RECEIVED
        enter(ExecutionState::Received);
        let descriptor = match self.registry.require(name) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                enter(ExecutionState::ToolNotFound);
                return Err(err);
            }
        };
        self.metrics.record_call();
        let fail = |state: ExecutionState, err: Error| {
            enter(state);
            self.metrics.record_error(name, err.code, elapsed_ms(started));
            err
        };

        // RATE_CHECK
        enter(ExecutionState::RateCheck);
        if let Some(limit) = descriptor.rate_limit {
            let window = if limit.window.is_zero() {
                self.config.default_rate_window
            } else {
                limit.window
            };
            let key = match caller {
                Some(caller) => format!("{}:{}", caller, name),
                None => name.to_string(),
            };
            let admitted = self.limiter.lock().check(&key, limit.max_calls, window);
            if !admitted {
                tracing::warn!(
                    "rate_limited: key={}, limit={}, window_ms={}",
                    key,
                    limit.max_calls,
                    window.as_millis()
                );
                let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
                return Err(fail(
                    ExecutionState::RateLimited,
                    Error::rate_limited(&key, limit.max_calls, window_ms),
                ));
            }
        }

        // CACHE_CHECK
        enter(ExecutionState::CacheCheck);
        let use_cache = take_use_cache(&mut params) && descriptor.cacheable;
        let key = cache_key(name, &params);
        if use_cache {
            let hit = self.cache.lock().get(&key);
            if let Some(result) = hit {
                tracing::debug!("cache_hit: tool={}", name);
                self.metrics.record_cache_hit();
                let duration_ms = elapsed_ms(started);
                self.metrics.record_success(name, duration_ms, true);
                enter(ExecutionState::Respond);
                return Ok(ExecutionResult {
                    execution_id,
                    tool: name.to_string(),
                    success: true,
                    result,
                    duration_ms,
                    timestamp: Utc::now(),
                    from_cache: true,
                    coalesced: false,
                });
            }
            self.metrics.record_cache_miss();
        }

        // VALIDATE
        enter(ExecutionState::Validate);
        let sanitized = match self.validator.validate(&descriptor, &params) {
            Ok(sanitized) => sanitized,
            Err(err) => return Err(fail(ExecutionState::ValidationFailed, err)),
        };

        // EXECUTE
        enter(ExecutionState::Execute);
        let (outcome, coalesced) = if use_cache {
            let (flight, guard) = self
                .flights
                .join(&key, || self.attempts(descriptor.clone(), sanitized));
            let coalesced = guard.is_none();
            if coalesced {
                tracing::debug!("execution_coalesced: tool={}", name);
                self.metrics.record_coalesced();
            }
            let outcome = flight.await;

            // CACHE_STORE (leader only; followers share the stored value)
            if let (Some(_), Ok(value)) = (&guard, &outcome) {
                enter(ExecutionState::CacheStore);
                self.cache.lock().set(key.clone(), value.clone());
            }
            drop(guard);
            (outcome, coalesced)
        } else {
            (self.attempts(descriptor.clone(), sanitized).await, false)
        };

        // RESPOND
        let duration_ms = elapsed_ms(started);
        match outcome {
            Ok(result) => {
                enter(ExecutionState::Respond);
                self.metrics.record_success(name, duration_ms, false);
                tracing::debug!("execution_succeeded: tool={}, duration_ms={}", name, duration_ms);
                Ok(ExecutionResult {
                    execution_id,
                    tool: name.to_string(),
                    success: true,
                    result,
                    duration_ms,
                    timestamp: Utc::now(),
                    from_cache: false,
                    coalesced,
                })
            }
            Err(err) => {
                tracing::warn!("execution_failed: tool={}, error={}", name, err);
                Err(fail(ExecutionState::ExecutionFailed, err))
            }
        }
    }

    /// The handler call wrapped in per-attempt timeout and bounded retries.
    fn attempts(
        &self,
        descriptor: Arc<ToolDescriptor>,
        params: Value,
    ) -> BoxFuture<'static, Result<Value>> {
        let retry = self.retry.clone();
        let metrics = self.metrics.clone();

        async move {
            retry
                .run(
                    |attempt| {
                        let descriptor = descriptor.clone();
                        let params = params.clone();
                        let metrics = metrics.clone();
                        async move {
                            tracing::debug!(
                                "attempt_started: tool={}, attempt={}",
                                descriptor.name,
                                attempt + 1
                            );
                            let outcome = match tokio::time::timeout(
                                descriptor.timeout,
                                descriptor.handler.call(params),
                            )
                            .await
                            {
                                Ok(outcome) => outcome,
                                Err(_) => Err(Error::timeout(
                                    &descriptor.name,
                                    u64::try_from(descriptor.timeout.as_millis())
                                        .unwrap_or(u64::MAX),
                                )),
                            };
                            if let Err(err) = &outcome {
                                if err.retryable {
                                    metrics.record_failed_attempt(err.code);
                                }
                            }
                            outcome
                        }
                    },
                    descriptor.max_retries,
                )
                .await
        }
        .boxed()
    }

    /// All registered tools, sorted by name.
    pub fn get_tools(&self) -> Vec<Arc<ToolDescriptor>> {
        self.registry.list()
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.registry.lookup(name)
    }

    /// Flattened counter snapshot.
    pub fn get_metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.snapshot()
    }

    pub fn tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.metrics.tool_stats(name)
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        let dropped = cache.len();
        cache.clear();
        tracing::info!("cache_cleared: entries={}", dropped);
    }

    /// Purge expired cache entries and rate buckets whose window has passed.
    pub fn sweep(&self) -> SweepStats {
        let cache_entries_expired = self.cache.lock().purge_expired();
        let rate_buckets_removed = self.limiter.lock().sweep();
        tracing::debug!(
            "sweep_cycle_completed: cache_entries={}, rate_buckets={}",
            cache_entries_expired,
            rate_buckets_removed
        );
        SweepStats {
            cache_entries_expired,
            rate_buckets_removed,
            completed_at: Some(Utc::now()),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Live rate buckets (current and not yet swept).
    pub fn rate_bucket_count(&self) -> usize {
        self.limiter.lock().bucket_count()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Default cache TTL as configured.
    pub fn cache_ttl(&self) -> Duration {
        self.config.default_cache_ttl
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handler::MockToolHandler;
    use crate::tools::{handler_fn, ParamDef, ParamType, ToolCategory};
    use crate::types::ErrorCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy::fixed(Duration::from_millis(1)),
            ..EngineConfig::default()
        }
    }

    fn engine_with(descriptor: ToolDescriptor) -> ExecutionEngine {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor).unwrap();
        ExecutionEngine::new(registry, fast_config()).unwrap()
    }

    fn counting_tool(name: &str, calls: Arc<AtomicU32>) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "counts invocations",
            ToolCategory::Utility,
            handler_fn(move |params| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(json!({ "call": n, "params": params }))
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let engine = engine_with(counting_tool("echo", Arc::default()));
        let err = engine.execute("nonexistent", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolNotFound);
        assert_eq!(engine.get_metrics()["tool_executions"], 0.0);
    }

    #[tokio::test]
    async fn test_second_identical_call_served_from_cache() {
        let mut mock = MockToolHandler::new();
        mock.expect_call()
            .times(1)
            .returning(|_| Ok(json!({"label": "positive"})));
        let engine = engine_with(ToolDescriptor::new(
            "sentiment",
            "mocked",
            ToolCategory::TextAnalysis,
            Arc::new(mock),
        ));

        let first = engine.execute("sentiment", json!({"text": "great"})).await.unwrap();
        let second = engine
            .execute("sentiment", json!({"text": "great", "useCache": true}))
            .await
            .unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.result, json!({"label": "positive"}));
        assert_ne!(first.execution_id, second.execution_id);

        let metrics = engine.get_metrics();
        assert_eq!(metrics["cache_hits"], 1.0);
        assert_eq!(metrics["cache_misses"], 1.0);
        assert_eq!(metrics["tool_successes"], 2.0);
    }

    #[tokio::test]
    async fn test_parameter_order_does_not_change_cache_key() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine_with(counting_tool("echo", calls.clone()));

        engine.execute("echo", json!({"a": 1, "b": 2})).await.unwrap();
        let second = engine.execute("echo", json!({"b": 2, "a": 1})).await.unwrap();

        assert!(second.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_use_cache_false_bypasses_and_is_stripped() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine_with(counting_tool("echo", calls.clone()));

        let params = json!({"x": 1, "useCache": false});
        let first = engine.execute("echo", params.clone()).await.unwrap();
        let second = engine.execute("echo", params).await.unwrap();

        assert!(!second.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.result["params"], json!({"x": 1}));
        assert_eq!(engine.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_only_explicit_false_disables_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine_with(counting_tool("echo", calls.clone()));

        engine.execute("echo", json!({"useCache": "no"})).await.unwrap();
        let second = engine.execute("echo", json!({"useCache": null})).await.unwrap();

        assert!(second.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncached_tool_never_caches() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine_with(counting_tool("echo", calls.clone()).uncached());

        engine.execute("echo", json!({})).await.unwrap();
        engine.execute("echo", json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_denies_third_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine_with(
            counting_tool("limited", calls.clone()).with_rate_limit(2, Duration::from_secs(60)),
        );

        for i in 0..2 {
            engine.execute("limited", json!({ "i": i })).await.unwrap();
        }
        let err = engine.execute("limited", json!({"i": 2})).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
        assert!(err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.get_metrics()["rate_limited"], 1.0);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_before_cache() {
        let engine = engine_with(
            counting_tool("limited", Arc::default()).with_rate_limit(1, Duration::from_secs(60)),
        );
        engine.execute("limited", json!({})).await.unwrap();
        let err = engine.execute("limited", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_caller() {
        let engine = engine_with(
            counting_tool("limited", Arc::default()).with_rate_limit(1, Duration::from_secs(60)),
        );
        let alice = CallerId::from_string("alice".to_string()).unwrap();
        let bob = CallerId::from_string("bob".to_string()).unwrap();

        engine.execute_for(&alice, "limited", json!({"a": 1})).await.unwrap();
        engine.execute_for(&bob, "limited", json!({"a": 2})).await.unwrap();
        let err = engine
            .execute_for(&alice, "limited", json!({"a": 3}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
        assert_eq!(err.context.unwrap()["key"], "alice:limited");
    }

    #[tokio::test]
    async fn test_validation_failure_skips_handler() {
        let mut mock = MockToolHandler::new();
        mock.expect_call().times(0);
        let engine = engine_with(
            ToolDescriptor::new("needs_text", "mocked", ToolCategory::TextAnalysis, Arc::new(mock))
                .with_param(ParamDef::required("text", ParamType::Text, "input")),
        );

        let err = engine.execute("needs_text", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(!err.retryable);
        assert_eq!(
            engine.tool_stats("needs_text").unwrap().error_patterns,
            vec![(ErrorCode::ValidationError, 1)]
        );
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_handler_runs() {
        let mut mock = MockToolHandler::new();
        mock.expect_call().times(0);
        let engine = engine_with(
            ToolDescriptor::new("web_scraping", "mocked", ToolCategory::WebRetrieval, Arc::new(mock))
                .with_param(ParamDef::required("url", ParamType::Url, "page")),
        );

        let err = engine
            .execute("web_scraping", json!({"url": "ftp://x"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUrl);
        assert!(!err.retryable);
        assert_eq!(engine.get_metrics()["retries"], 0.0);
    }

    #[tokio::test]
    async fn test_handler_sees_sanitized_params() {
        let engine = engine_with(
            counting_tool("echo", Arc::default())
                .with_param(ParamDef::required("text", ParamType::Text, "input")),
        );
        let out = engine
            .execute("echo", json!({"text": "hi<script>alert(1)</script>"}))
            .await
            .unwrap();
        assert_eq!(out.result["params"]["text"], "hi");
    }

    #[tokio::test]
    async fn test_always_failing_handler_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let engine = engine_with(
            ToolDescriptor::new(
                "flaky",
                "always fails",
                ToolCategory::WebRetrieval,
                handler_fn(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(Error::transient(ErrorCode::ScrapingError, "upstream 503"))
                    }
                }),
            )
            .with_max_retries(3),
        );

        let err = engine.execute("flaky", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MaxRetriesExceeded);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.get_metrics()["retries"], 3.0);
        assert_eq!(engine.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_handler_error_returned_unchanged() {
        let mut mock = MockToolHandler::new();
        mock.expect_call()
            .times(1)
            .returning(|_| Err(Error::unsupported_format("xml")));
        let engine = engine_with(
            ToolDescriptor::new("data", "mocked", ToolCategory::DataProcessing, Arc::new(mock))
                .with_max_retries(5),
        );

        let err = engine.execute("data", json!({"format": "xml"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFormat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_feeds_retry_loop() {
        let engine = engine_with(
            ToolDescriptor::new(
                "slow",
                "never answers in time",
                ToolCategory::Utility,
                handler_fn(|_| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(json!({}))
                }),
            )
            .with_timeout(Duration::from_millis(50))
            .with_max_retries(2),
        );

        let err = engine.execute("slow", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MaxRetriesExceeded);
        assert_eq!(err.cause.as_ref().unwrap().code, ErrorCode::Timeout);
        assert_eq!(engine.get_metrics()["timeouts"], 2.0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_calls_coalesce() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let engine = engine_with(ToolDescriptor::new(
            "slow_echo",
            "slow",
            ToolCategory::Utility,
            handler_fn(move |params| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(params)
                }
            }),
        ));

        let results = futures::future::join_all(
            (0..5).map(|_| engine.execute("slow_echo", json!({"q": "same"}))),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let coalesced = results
            .iter()
            .filter(|r| r.as_ref().unwrap().coalesced)
            .count();
        assert_eq!(coalesced, 4);
        assert_eq!(engine.get_metrics()["coalesced"], 4.0);
        assert!(engine.flights.is_empty());
        assert_eq!(engine.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_state() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                counting_tool("echo", Arc::default())
                    .with_rate_limit(5, Duration::from_millis(10)),
            )
            .unwrap();
        let engine = ExecutionEngine::new(
            registry,
            EngineConfig {
                default_cache_ttl: Duration::from_millis(10),
                ..fast_config()
            },
        )
        .unwrap();

        engine.execute("echo", json!({})).await.unwrap();
        assert_eq!(engine.cache_len(), 1);
        assert_eq!(engine.rate_bucket_count(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stats = engine.sweep();
        assert_eq!(stats.cache_entries_expired, 1);
        assert_eq!(stats.rate_buckets_removed, 1);
        assert!(stats.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine_with(counting_tool("echo", calls.clone()));
        engine.execute("echo", json!({})).await.unwrap();
        engine.clear_cache();
        engine.execute("echo", json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_rate_denial_is_logged() {
        let engine = engine_with(
            counting_tool("limited", Arc::default()).with_rate_limit(1, Duration::from_secs(60)),
        );
        engine.execute("limited", json!({"n": 1})).await.unwrap();
        let _ = engine.execute("limited", json!({"n": 2})).await;
        assert!(logs_contain("rate_limited: key=limited"));
    }

    #[test]
    fn test_cache_key_is_canonical() {
        assert_eq!(
            cache_key("t", &json!({"b": 1, "a": [1, 2]})),
            r#"t:{"a":[1,2],"b":1}"#
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionState::RateLimited.is_terminal());
        assert!(!ExecutionState::CacheCheck.is_terminal());
        assert_eq!(ExecutionState::CacheStore.to_string(), "CACHE_STORE");
    }
}
