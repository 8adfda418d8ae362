//! Delistbot - delisting-event trading daemon
//!
//! Watches an announcement channel for Binance delisting notices and opens
//! leveraged Bybit longs on symbols whose funding is deeply negative.
//! Headless; progress is logged to stdout, snapshots as structured JSON.
//!
//! # Usage
//! ```sh
//! MODE=live SOURCE_KIND=polling cargo run
//! ```
//!
//! # Environment Variables
//! - `MODE` - `live` or `mock` dry run (default: live)
//! - `SOURCE_KIND` - `polling` (Bot API) or `stream` (WebSocket feed)
//! - `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `ANNOUNCEMENT_CHANNEL`
//! - `BYBIT_API_KEY`, `BYBIT_API_SECRET`, `BYBIT_BASE_URL`
//! - `FUNDING_THRESHOLD`, `LEVERAGE`, `COOLDOWN_HOURS`, ...

use anyhow::Result;
use delistbot::application::profit_monitor::{ProfitMonitor, ProfitMonitorConfig};
use delistbot::application::system::Application;
use delistbot::config::Config;
use delistbot::infrastructure::observability::MetricsReporter;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Delistbot {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Mode={:?}, Source={:?}, Channel=@{}, Threshold={:.4}%",
        config.mode,
        config.source_kind,
        config.announcement_channel,
        config.funding_threshold * 100.0
    );

    let app = Application::build(config.clone()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if config.observability_enabled {
        let reporter = MetricsReporter::new(
            app.metrics.clone(),
            app.resolver.clone(),
            app.cooldown.clone(),
            config.observability_interval_seconds,
        );
        tokio::spawn(reporter.run(shutdown_rx.clone()));
        info!(
            "Metrics reporter started (interval: {}s)",
            config.observability_interval_seconds
        );
    } else {
        info!("Metrics reporting disabled.");
    }

    if config.profit_monitor_enabled {
        let monitor = ProfitMonitor::new(
            app.gateway.clone(),
            app.notifier.clone(),
            ProfitMonitorConfig {
                threshold_pct: config.profit_threshold_pct,
                close_fraction: config.profit_close_fraction,
                check_interval: Duration::from_secs(config.profit_check_interval_seconds),
            },
        );
        tokio::spawn(monitor.run(shutdown_rx.clone()));
        info!("Profit monitor started.");
    }

    let run_handle = tokio::spawn(app.run(shutdown_rx));
    info!("Monitoring loop running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received...");
    let _ = shutdown_tx.send(true);

    run_handle.await??;
    Ok(())
}
