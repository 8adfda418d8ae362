//! Delist-event trade pipeline.
//!
//! Per inbound message: parse -> resolve -> filter -> dedup claim ->
//! execute -> record + notify. Every branch that stops a message (no match,
//! no symbols, nothing eligible, trade failure) is a normal outcome; nothing
//! on this path may take down the monitoring loop.

use crate::application::cooldown::DedupCooldown;
use crate::application::eligibility::EligibilityFilter;
use crate::application::parser;
use crate::application::resolver::SymbolResolver;
use crate::application::trade_executor::TradeExecutor;
use crate::domain::errors::TradeFailure;
use crate::domain::events::{DelistEvent, InboundMessage, TradeRecord};
use crate::domain::ports::Notifier;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Funding-rate ceiling for eligibility; negative, e.g. -0.01 for -1%.
    pub funding_threshold: f64,
    pub max_trades_per_event: usize,
}

pub struct Pipeline {
    resolver: Arc<SymbolResolver>,
    filter: EligibilityFilter,
    executor: Arc<TradeExecutor>,
    cooldown: Arc<DedupCooldown>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    settings: PipelineSettings,
    /// In-flight execution tasks; joined on shutdown so open orders are
    /// never abandoned mid-submit.
    executions: Mutex<JoinSet<()>>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<SymbolResolver>,
        filter: EligibilityFilter,
        executor: Arc<TradeExecutor>,
        cooldown: Arc<DedupCooldown>,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver,
            filter,
            executor,
            cooldown,
            notifier,
            metrics,
            settings,
            executions: Mutex::new(JoinSet::new()),
        }
    }

    /// Process one inbound channel message end to end.
    ///
    /// Evaluation (parse/resolve/filter) runs inline; the trade itself is
    /// spawned so a slow order round-trip never stalls message polling. The
    /// dedup claim is taken inside the spawned task but before any network
    /// call, and claims are serialized through the cooldown set, so two
    /// events with the same key can never both trade.
    pub async fn handle_message(&self, message: InboundMessage) {
        self.metrics.messages_received.inc();
        debug!(
            "Pipeline: message {} from {}: {}",
            message.message_id, message.channel, message.text
        );

        // Most traffic is unrelated chatter; a miss is silent by design.
        let Some(event) = parser::parse(&message.text) else {
            return;
        };

        self.metrics.events_detected.inc();
        info!(
            "Pipeline: delist event detected for tokens {:?}",
            event.tokens
        );
        self.notify(&format_event_detected(&event)).await;

        let symbols = self.resolver.lookup(&event.tokens).await;
        if symbols.is_empty() {
            warn!("Pipeline: no trading pairs found for {:?}", event.tokens);
            self.notify(&format!(
                "⚠️ No tradable pairs found for {}",
                event.tokens.join(", ")
            ))
            .await;
            return;
        }

        let ranked = match self
            .filter
            .select(
                &symbols,
                self.settings.funding_threshold,
                self.settings.max_trades_per_event,
            )
            .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Pipeline: funding eligibility check failed: {}", e);
                return;
            }
        };

        if ranked.is_empty() {
            info!(
                "Pipeline: no candidate at or below funding threshold {:.4}%",
                self.settings.funding_threshold * 100.0
            );
            self.notify("No candidate met the funding-rate condition").await;
            return;
        }

        self.spawn_event_execution(event, ranked).await;
    }

    /// Await all in-flight executions. Called during orderly shutdown.
    pub async fn drain(&self) {
        let mut executions = self.executions.lock().await;
        while executions.join_next().await.is_some() {}
    }

    async fn spawn_event_execution(&self, event: DelistEvent, ranked: Vec<(String, f64)>) {
        let executor = Arc::clone(&self.executor);
        let cooldown = Arc::clone(&self.cooldown);
        let notifier = Arc::clone(&self.notifier);
        let metrics = self.metrics.clone();

        let mut executions = self.executions.lock().await;
        // Reap finished tasks so the set only holds live handles.
        while executions.try_join_next().is_some() {}
        executions.spawn(async move {
            run_event(executor, cooldown, notifier, metrics, event, ranked).await;
        });
    }

    async fn notify(&self, text: &str) {
        if !self.notifier.send(text).await {
            warn!("Pipeline: notification delivery failed");
        }
    }
}

/// Execute the ranked candidates of one event sequentially. Candidates share
/// the event's dedup key, so after the first recorded trade the remaining
/// claims fail and are skipped; a failed trade releases the claim so the
/// next candidate (or a later announcement) can retry.
async fn run_event(
    executor: Arc<TradeExecutor>,
    cooldown: Arc<DedupCooldown>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
    event: DelistEvent,
    ranked: Vec<(String, f64)>,
) {
    let key = event.dedup_key();

    for (symbol, rate) in ranked {
        if !cooldown.claim(&key) {
            info!("Pipeline: event {} already traded, skipping {}", key, symbol);
            metrics.trades_skipped.inc();
            continue;
        }

        match executor.execute(&symbol, rate, &event).await {
            Ok(record) => {
                cooldown.record(&key);
                metrics.trades_executed.inc();
                if !notifier.send(&format_trade_executed(&record)).await {
                    warn!("Pipeline: trade notification delivery failed");
                }
            }
            Err(failure) => {
                cooldown.release(&key);
                metrics.trades_failed.inc();
                warn!("Pipeline: trade failed for {}: {}", symbol, failure);
                if let TradeFailure::InsufficientBalance { coin, available } = &failure {
                    notifier
                        .send(&format!(
                            "⚠️ Delist trade skipped: insufficient balance ({} {})",
                            available, coin
                        ))
                        .await;
                }
            }
        }
    }
}

fn format_event_detected(event: &DelistEvent) -> String {
    format!(
        "🚨 Binance delisting detected\nTokens: {}\nDetected: {}\nMessage: {}",
        event.tokens.join(", "),
        event.detected_at.format("%Y-%m-%d %H:%M:%S"),
        event.raw_text
    )
}

fn format_trade_executed(record: &TradeRecord) -> String {
    format!(
        "🚀 Delist trade executed\n\
         Symbol: <b>{}</b>\n\
         Side: <b>{}</b>\n\
         Qty: <b>{}</b>\n\
         Price: <b>{}</b>\n\
         Leverage: <b>{}x</b>\n\
         Funding rate: <b>{:.4}%</b>\n\
         Order ID: <b>{}</b>\n\
         Tokens: <b>{}</b>",
        record.symbol,
        record.side,
        record.qty,
        record.price,
        record.leverage,
        record.funding_rate * 100.0,
        record.order_id,
        record.event.tokens.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::trade_executor::ExecutorConfig;
    use crate::infrastructure::mock::{MockExchangeGateway, MockNotifier};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const DELIST_TEXT: &str = "Binance Will Delist XYZ on 2024-08-19";

    fn message(id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id,
            channel: "announcements".to_string(),
            text: text.to_string(),
        }
    }

    fn build_pipeline(gateway: MockExchangeGateway) -> (Arc<Pipeline>, TestHandles) {
        let orders = gateway.submitted_orders();
        let gateway: Arc<MockExchangeGateway> = Arc::new(gateway);
        let notifier = Arc::new(MockNotifier::new());
        let sent = notifier.sent_messages();

        let resolver = Arc::new(SymbolResolver::new(gateway.clone()));
        let cooldown = Arc::new(DedupCooldown::new(Duration::from_secs(24 * 3600)));
        let pipeline = Pipeline::new(
            resolver.clone(),
            EligibilityFilter::new(gateway.clone()),
            Arc::new(TradeExecutor::new(
                gateway.clone(),
                ExecutorConfig {
                    quote_coin: "USDT".to_string(),
                    leverage: 5,
                    position_fraction: Decimal::ONE,
                },
            )),
            cooldown,
            notifier,
            Metrics::new().unwrap(),
            PipelineSettings {
                funding_threshold: -0.01,
                max_trades_per_event: 1,
            },
        );

        (
            Arc::new(pipeline),
            TestHandles {
                resolver,
                orders,
                sent,
            },
        )
    }

    struct TestHandles {
        resolver: Arc<SymbolResolver>,
        orders: Arc<std::sync::Mutex<Vec<crate::domain::events::MarketOrderRequest>>>,
        sent: Arc<std::sync::Mutex<Vec<String>>>,
    }

    fn eligible_gateway() -> MockExchangeGateway {
        MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_last_price("XYZUSDT", dec!(2.0))
            .with_funding_rate("XYZUSDT", -0.02)
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0))
    }

    #[tokio::test]
    async fn test_duplicate_event_trades_once() {
        let (pipeline, handles) = build_pipeline(eligible_gateway());
        handles.resolver.refresh().await.unwrap();

        pipeline.handle_message(message(1, DELIST_TEXT)).await;
        pipeline.drain().await;
        pipeline.handle_message(message(2, DELIST_TEXT)).await;
        pipeline.drain().await;

        let orders = handles.orders.lock().unwrap();
        assert_eq!(orders.len(), 1, "second identical event must not re-trade");
        // (1000 * 5) / 2.0
        assert_eq!(orders[0].qty, dec!(2500.0));
    }

    #[tokio::test]
    async fn test_unparsed_message_is_ignored_silently() {
        let (pipeline, handles) = build_pipeline(eligible_gateway());
        handles.resolver.refresh().await.unwrap();

        pipeline
            .handle_message(message(1, "gm, market looks quiet today"))
            .await;
        pipeline.drain().await;

        assert!(handles.orders.lock().unwrap().is_empty());
        assert!(handles.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_symbols_notifies_and_stops() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_last_price("BTCUSDT", dec!(50000))
            .with_funding_rate("BTCUSDT", -0.02);
        let (pipeline, handles) = build_pipeline(gateway);
        handles.resolver.refresh().await.unwrap();

        pipeline.handle_message(message(1, DELIST_TEXT)).await;
        pipeline.drain().await;

        assert!(handles.orders.lock().unwrap().is_empty());
        let sent = handles.sent.lock().unwrap();
        assert!(sent.iter().any(|m| m.contains("No tradable pairs")));
    }

    #[tokio::test]
    async fn test_funding_above_threshold_is_not_traded() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_last_price("XYZUSDT", dec!(2.0))
            .with_funding_rate("XYZUSDT", -0.005)
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));
        let (pipeline, handles) = build_pipeline(gateway);
        handles.resolver.refresh().await.unwrap();

        pipeline.handle_message(message(1, DELIST_TEXT)).await;
        pipeline.drain().await;

        assert!(handles.orders.lock().unwrap().is_empty());
        let sent = handles.sent.lock().unwrap();
        assert!(sent.iter().any(|m| m.contains("funding-rate condition")));
    }

    #[tokio::test]
    async fn test_failed_trade_releases_key_for_retry() {
        let gateway = eligible_gateway().with_order_rejection("risk limit exceeded");
        let (pipeline, handles) = build_pipeline(gateway);
        handles.resolver.refresh().await.unwrap();

        pipeline.handle_message(message(1, DELIST_TEXT)).await;
        pipeline.drain().await;
        assert!(handles.orders.lock().unwrap().is_empty());

        // The key was released, so a later announcement may try again.
        pipeline.handle_message(message(2, DELIST_TEXT)).await;
        pipeline.drain().await;
        // Still rejected, but the attempt reached the gateway both times -
        // nothing deadlocks on a stuck pending claim.
        assert!(handles.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_outage_does_not_crash_pipeline() {
        let gateway = MockExchangeGateway::new().with_transport_down();
        let (pipeline, handles) = build_pipeline(gateway);
        // Refresh fails, mapping stays empty.
        assert!(handles.resolver.refresh().await.is_err());

        pipeline.handle_message(message(1, DELIST_TEXT)).await;
        pipeline.drain().await;
        assert!(handles.orders.lock().unwrap().is_empty());
    }
}
