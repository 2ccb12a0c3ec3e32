//! Background sweep of expired engine state.
//!
//! Lazy expiry keeps reads correct, but keys nobody touches again (cached
//! results for one-off parameters, rate buckets of past windows) would pile up
//! in a long-running process. `SweepService` periodically calls
//! [`ExecutionEngine::sweep`] to drop them.

use crate::engine::ExecutionEngine;
use crate::types::SweepConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

/// Statistics from one sweep cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStats {
    /// Cached results past their TTL.
    pub cache_entries_expired: usize,
    /// Rate buckets whose window has passed.
    pub rate_buckets_removed: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Periodic sweeper for one engine.
#[derive(Debug)]
pub struct SweepService {
    engine: Arc<ExecutionEngine>,
    config: SweepConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl SweepService {
    pub fn new(engine: Arc<ExecutionEngine>, config: SweepConfig) -> Self {
        Self {
            engine,
            config,
            stop_tx: None,
        }
    }

    /// Start the sweep loop in the background.
    /// Returns immediately; sweeps run in a spawned task. A zero interval
    /// leaves the sweep disabled and the returned task finishes at once.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let period = self.config.interval;
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        if period.is_zero() {
            tracing::warn!("sweep_service_disabled: reason=zero_interval");
            return tokio::spawn(async {});
        }

        tracing::info!("sweep_service_started: interval_ms={}", period.as_millis());
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can have expired yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = engine.sweep();
                        if stats.cache_entries_expired > 0 || stats.rate_buckets_removed > 0 {
                            tracing::info!(
                                "sweep_completed: cache_entries={}, rate_buckets={}",
                                stats.cache_entries_expired,
                                stats.rate_buckets_removed,
                            );
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("sweep_service_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the sweep loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{handler_fn, ToolCategory, ToolDescriptor, ToolRegistry};
    use crate::types::EngineConfig;
    use serde_json::json;
    use std::time::Duration;

    fn engine_with_short_ttl() -> Arc<ExecutionEngine> {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::new(
                "echo",
                "echo",
                ToolCategory::Utility,
                handler_fn(|p| async move { Ok(p) }),
            ))
            .unwrap();
        let config = EngineConfig {
            default_cache_ttl: Duration::from_millis(10),
            ..EngineConfig::default()
        };
        Arc::new(ExecutionEngine::new(registry, config).unwrap())
    }

    #[tokio::test]
    async fn test_sweep_service_purges_in_background() {
        let engine = engine_with_short_ttl();
        engine.execute("echo", json!({"n": 1})).await.unwrap();
        assert_eq!(engine.cache_len(), 1);

        let mut service = SweepService::new(
            engine.clone(),
            SweepConfig {
                enabled: true,
                interval: Duration::from_millis(20),
            },
        );
        let handle = service.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.cache_len(), 0);

        service.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweep service should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_panic_the_task() {
        let engine = engine_with_short_ttl();
        let mut service = SweepService::new(
            engine,
            SweepConfig {
                enabled: true,
                interval: Duration::ZERO,
            },
        );

        let handle = service.start();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("disabled sweep should finish")
            .unwrap();
        service.stop();
    }
}
