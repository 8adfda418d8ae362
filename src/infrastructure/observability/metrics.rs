//! Prometheus metrics definitions for the delist pipeline.
//!
//! All metrics use the `delistbot_` prefix and are read-only.

use prometheus::{
    Gauge, IntCounter, Opts, Registry,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Counters and gauges for the trade pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Messages delivered by the source
    pub messages_received: IntCounter,
    /// Delisting announcements recognized by the parser
    pub events_detected: IntCounter,
    /// Orders accepted by the exchange
    pub trades_executed: IntCounter,
    /// Trade attempts that ended in a typed failure
    pub trades_failed: IntCounter,
    /// Candidates skipped because the dedup key was already held
    pub trades_skipped: IntCounter,
    /// Symbol-cache refresh failures (previous cache retained)
    pub refresh_failures: IntCounter,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all counters registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_received = IntCounter::with_opts(Opts::new(
            "delistbot_messages_received_total",
            "Messages delivered by the message source",
        ))?;
        registry.register(Box::new(messages_received.clone()))?;

        let events_detected = IntCounter::with_opts(Opts::new(
            "delistbot_events_detected_total",
            "Delisting announcements recognized by the parser",
        ))?;
        registry.register(Box::new(events_detected.clone()))?;

        let trades_executed = IntCounter::with_opts(Opts::new(
            "delistbot_trades_executed_total",
            "Orders accepted by the exchange",
        ))?;
        registry.register(Box::new(trades_executed.clone()))?;

        let trades_failed = IntCounter::with_opts(Opts::new(
            "delistbot_trades_failed_total",
            "Trade attempts that ended in a typed failure",
        ))?;
        registry.register(Box::new(trades_failed.clone()))?;

        let trades_skipped = IntCounter::with_opts(Opts::new(
            "delistbot_trades_skipped_total",
            "Candidates skipped because the event already traded",
        ))?;
        registry.register(Box::new(trades_skipped.clone()))?;

        let refresh_failures = IntCounter::with_opts(Opts::new(
            "delistbot_refresh_failures_total",
            "Symbol-cache refresh failures",
        ))?;
        registry.register(Box::new(refresh_failures.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "delistbot_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            messages_received,
            events_detected,
            trades_executed,
            trades_failed,
            trades_skipped,
            refresh_failures,
            uptime_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
