//! Push-based metrics reporter.
//!
//! Periodically outputs a pipeline snapshot as structured JSON to stdout.
//! No HTTP server, no incoming connections; only outbound data.

use crate::application::cooldown::DedupCooldown;
use crate::application::resolver::SymbolResolver;
use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Snapshot for JSON output.
#[derive(Serialize)]
pub struct PipelineSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub messages_received: u64,
    pub events_detected: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub trades_skipped: u64,
    pub refresh_failures: u64,
    pub symbol_tokens_mapped: usize,
    pub symbol_cache_refreshed_at: Option<String>,
    pub cooldown_keys_active: usize,
}

pub struct MetricsReporter {
    metrics: Metrics,
    resolver: Arc<SymbolResolver>,
    cooldown: Arc<DedupCooldown>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        metrics: Metrics,
        resolver: Arc<SymbolResolver>,
        cooldown: Arc<DedupCooldown>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            metrics,
            resolver,
            cooldown,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Output snapshots until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MetricsReporter: push-based metrics every {:?} (JSON to stdout)",
            self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("MetricsReporter: shutdown signal received");
                        return;
                    }
                }
            }

            let snapshot = self.collect_snapshot().await;
            match serde_json::to_string(&snapshot) {
                Ok(json) => info!(target: "metrics", "{}", json),
                Err(e) => warn!("MetricsReporter: failed to serialize snapshot: {}", e),
            }
        }
    }

    async fn collect_snapshot(&self) -> PipelineSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        PipelineSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            messages_received: self.metrics.messages_received.get(),
            events_detected: self.metrics.events_detected.get(),
            trades_executed: self.metrics.trades_executed.get(),
            trades_failed: self.metrics.trades_failed.get(),
            trades_skipped: self.metrics.trades_skipped.get(),
            refresh_failures: self.metrics.refresh_failures.get(),
            symbol_tokens_mapped: self.resolver.token_count().await,
            symbol_cache_refreshed_at: self
                .resolver
                .last_refreshed()
                .await
                .map(|t| t.to_rfc3339()),
            cooldown_keys_active: self.cooldown.active(),
        }
    }
}
