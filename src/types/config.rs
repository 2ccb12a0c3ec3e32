//! Configuration structures.
//!
//! Configuration is loaded from a JSON file (optional) and then overridden by
//! `TOOLGATE_*` environment variables.

use crate::engine::retry::RetryPolicy;
use crate::types::{self, Error};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
pub struct Config {
    /// Execution engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Periodic sweep of expired cache entries and rate buckets.
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Built-in handler configuration.
    #[serde(default)]
    pub handlers: HandlerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> types::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given (defaults otherwise), then apply env overrides.
    pub fn load(path: Option<&Path>) -> types::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that deserialize but cannot drive the gateway.
    pub fn validate(&self) -> types::Result<()> {
        if self.sweep.enabled && self.sweep.interval.is_zero() {
            return Err(Error::configuration(
                "sweep.interval must be non-zero when the sweep is enabled",
            ));
        }
        Ok(())
    }

    /// Apply `TOOLGATE_*` environment overrides.
    pub fn apply_env(&mut self) -> types::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> types::Result<()> {
        if let Some(raw) = lookup("TOOLGATE_CACHE_TTL") {
            self.engine.default_cache_ttl = parse_duration("TOOLGATE_CACHE_TTL", &raw)?;
        }
        if let Some(raw) = lookup("TOOLGATE_CACHE_CAPACITY") {
            let capacity: usize = raw.parse().map_err(|_| {
                Error::configuration(format!("TOOLGATE_CACHE_CAPACITY is not a number: {}", raw))
            })?;
            self.engine.cache_capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(raw) = lookup("TOOLGATE_RETRY_BASE_DELAY") {
            self.engine.retry.base_delay = parse_duration("TOOLGATE_RETRY_BASE_DELAY", &raw)?;
        }
        if let Some(raw) = lookup("TOOLGATE_TRANSLATION_ENDPOINT") {
            self.handlers.translation_endpoint = Some(raw);
        }
        if let Some(raw) = lookup("TOOLGATE_TRANSLATION_API_KEY") {
            self.handlers.translation_api_key = Some(raw);
        }
        Ok(())
    }

    /// JSON Schema of the configuration file.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}

fn parse_duration(key: &str, raw: &str) -> types::Result<Duration> {
    humantime_serde::re::humantime::parse_duration(raw)
        .map_err(|e| Error::configuration(format!("{} is not a duration ({}): {}", key, raw, e)))
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    /// TTL for cached tool results.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub default_cache_ttl: Duration,

    /// Approximate upper bound on cached entries (oldest evicted first).
    pub cache_capacity: Option<usize>,

    /// Rate-limit window used when a tool declares a limit without a window.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub default_rate_window: Duration,

    /// Backoff policy for handler retries.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl: Duration::from_secs(300),
            cache_capacity: Some(10_000),
            default_rate_window: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Built-in handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HandlerConfig {
    /// LibreTranslate-compatible `/translate` endpoint.
    pub translation_endpoint: Option<String>,

    pub translation_api_key: Option<String>,

    /// User-Agent sent by outbound HTTP handlers.
    pub user_agent: String,

    /// Maximum response body read by `web_scraping`.
    pub scrape_max_bytes: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            translation_endpoint: None,
            translation_api_key: None,
            user_agent: concat!("toolgate/", env!("CARGO_PKG_VERSION")).to_string(),
            scrape_max_bytes: 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
