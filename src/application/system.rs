//! Application wiring and lifecycle.
//!
//! Builds the pipeline against mock or live collaborators, owns the
//! periodic symbol-refresh task and the ingestion loop, and runs the
//! orderly shutdown sequence: stop ingestion, stop refresh, let in-flight
//! trades finish, abort cooldown timers.

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::application::cooldown::DedupCooldown;
use crate::application::eligibility::EligibilityFilter;
use crate::application::pipeline::{Pipeline, PipelineSettings};
use crate::application::resolver::SymbolResolver;
use crate::application::trade_executor::{ExecutorConfig, TradeExecutor};
use crate::config::{Config, Mode, SourceKind};
use crate::domain::errors::SourceError;
use crate::domain::ports::{ExchangeGateway, MessageSource, Notifier};
use crate::infrastructure::bybit::BybitGateway;
use crate::infrastructure::feed::WsFeedSource;
use crate::infrastructure::mock::{MockExchangeGateway, MockMessageSource, MockNotifier};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::telegram::{TelegramNotifier, TelegramPollingSource};

const MAX_INGEST_BACKOFF_SECS: u64 = 60;

pub struct Application {
    pub config: Config,
    pub gateway: Arc<dyn ExchangeGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub resolver: Arc<SymbolResolver>,
    pub cooldown: Arc<DedupCooldown>,
    pub metrics: Metrics,
    pipeline: Arc<Pipeline>,
    source: Box<dyn MessageSource>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building delistbot application (Mode: {:?})...", config.mode);

        let (gateway, source, notifier): (
            Arc<dyn ExchangeGateway>,
            Box<dyn MessageSource>,
            Arc<dyn Notifier>,
        ) = match config.mode {
            Mode::Mock => {
                info!("Using mock collaborators (dry run)");
                let gateway = MockExchangeGateway::new()
                    .with_balance(&config.quote_coin, dec!(1000))
                    .with_last_price("XYZUSDT", dec!(2.0))
                    .with_funding_rate("XYZUSDT", -0.02)
                    .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));
                let source = MockMessageSource::new(
                    &config.announcement_channel,
                    vec!["Binance Will Delist XYZ on 2024-08-19".to_string()],
                );
                (
                    Arc::new(gateway) as Arc<dyn ExchangeGateway>,
                    Box::new(source) as Box<dyn MessageSource>,
                    Arc::new(MockNotifier::new()) as Arc<dyn Notifier>,
                )
            }
            Mode::Live => {
                info!("Using Bybit gateway ({})", config.bybit_base_url);
                let gateway = Arc::new(BybitGateway::new(
                    config.bybit_base_url.clone(),
                    config.bybit_api_key.clone(),
                    config.bybit_api_secret.clone(),
                    config.bybit_recv_window_ms,
                )) as Arc<dyn ExchangeGateway>;

                let source: Box<dyn MessageSource> = match config.source_kind {
                    SourceKind::Polling => {
                        info!(
                            "Using Telegram long-polling source (channel @{})",
                            config.announcement_channel
                        );
                        Box::new(TelegramPollingSource::new(
                            config.telegram_bot_token.clone(),
                            config.announcement_channel.clone(),
                            Duration::from_secs(config.poll_pause_seconds),
                        ))
                    }
                    SourceKind::Stream => {
                        info!("Using WebSocket feed source ({})", config.feed_ws_url);
                        Box::new(WsFeedSource::connect(
                            config.feed_ws_url.clone(),
                            config.announcement_channel.clone(),
                        ))
                    }
                };

                let notifier = Arc::new(TelegramNotifier::new(
                    config.telegram_bot_token.clone(),
                    config.telegram_chat_id.clone(),
                )) as Arc<dyn Notifier>;

                (gateway, source, notifier)
            }
        };

        let metrics = Metrics::new()?;
        let resolver = Arc::new(SymbolResolver::new(gateway.clone()));
        let cooldown = Arc::new(DedupCooldown::new(Duration::from_secs(
            config.cooldown_hours * 3600,
        )));

        let executor = Arc::new(TradeExecutor::new(
            gateway.clone(),
            ExecutorConfig {
                quote_coin: config.quote_coin.clone(),
                leverage: config.leverage,
                position_fraction: config.position_fraction,
            },
        ));

        let pipeline = Arc::new(Pipeline::new(
            resolver.clone(),
            EligibilityFilter::new(gateway.clone()),
            executor,
            cooldown.clone(),
            notifier.clone(),
            metrics.clone(),
            PipelineSettings {
                funding_threshold: config.funding_threshold,
                max_trades_per_event: config.max_trades_per_event,
            },
        ));

        Ok(Self {
            config,
            gateway,
            notifier,
            resolver,
            cooldown,
            metrics,
            pipeline,
            source,
        })
    }

    /// Run the ingestion loop until the shutdown signal flips, then wind
    /// everything down in order.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        // Populate the symbol cache before the first message; a failed
        // initial refresh is survivable (lookups warn until the next cycle).
        info!("Initializing symbol cache...");
        match self.resolver.refresh().await {
            Ok(()) => {}
            Err(e) => {
                self.metrics.refresh_failures.inc();
                warn!("Initial symbol cache refresh failed: {}", e);
            }
        }

        let refresh_task = spawn_refresh_task(
            self.resolver.clone(),
            self.metrics.clone(),
            Duration::from_secs(self.config.symbol_refresh_seconds),
            shutdown.clone(),
        );

        info!(
            "Monitoring channel @{} for delisting announcements",
            self.config.announcement_channel
        );

        let mut backoff = 1u64;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Ingestion loop: shutdown signal received");
                        break;
                    }
                }
                result = self.source.next_message() => match result {
                    Ok(message) => {
                        backoff = 1;
                        self.pipeline.handle_message(message).await;
                    }
                    Err(SourceError::Closed) => {
                        warn!("Message source closed, stopping ingestion");
                        break;
                    }
                    Err(SourceError::Transport { reason }) => {
                        error!(
                            "Message transport failure: {}. Retrying in {}s...",
                            reason, backoff
                        );
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        backoff = (backoff * 2).min(MAX_INGEST_BACKOFF_SECS);
                    }
                }
            }
        }

        // Orderly shutdown: the refresh task observes the same signal; wait
        // for it, then let in-flight executions finish before dropping the
        // cooldown timers.
        info!("Initiating graceful shutdown sequence...");
        if let Err(e) = refresh_task.await {
            warn!("Symbol refresh task ended abnormally: {}", e);
        }
        self.pipeline.drain().await;
        self.cooldown.shutdown();
        info!("Graceful shutdown complete. Goodbye!");

        Ok(())
    }
}

fn spawn_refresh_task(
    resolver: Arc<SymbolResolver>,
    metrics: Metrics,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Symbol refresh task: shutdown signal received");
                        return;
                    }
                    continue;
                }
            }

            info!("Updating symbol cache...");
            if let Err(e) = resolver.refresh().await {
                metrics.refresh_failures.inc();
                // Previous mapping stays in place; stale beats empty.
                warn!("Symbol cache refresh failed: {}", e);
            }
        }
    })
}
