//! Optional profit-taking monitor.
//!
//! Standalone utility outside the delist decision path: polls open
//! positions and partial-closes any whose unrealised profit crosses a
//! configured percentage of position value. Disabled by default
//! (`PROFIT_MONITOR_ENABLED`).

use crate::domain::events::PositionInfo;
use crate::domain::sizing::quantize_to_step;
use crate::domain::ports::{ExchangeGateway, Notifier};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ProfitMonitorConfig {
    /// Unrealised profit, as a percentage of position value, that triggers
    /// a partial close. Default 50.0.
    pub threshold_pct: f64,
    /// Fraction of the position size to close when triggered.
    pub close_fraction: f64,
    pub check_interval: Duration,
}

pub struct ProfitMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    config: ProfitMonitorConfig,
}

impl ProfitMonitor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        config: ProfitMonitorConfig,
    ) -> Self {
        Self {
            gateway,
            notifier,
            config,
        }
    }

    /// Poll positions until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "ProfitMonitor: started (threshold {:.1}%, close {:.0}%, every {:?})",
            self.config.threshold_pct,
            self.config.close_fraction * 100.0,
            self.config.check_interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ProfitMonitor: shutdown signal received");
                        return;
                    }
                }
            }

            if let Err(e) = self.check_once().await {
                warn!("ProfitMonitor: position sweep failed: {}", e);
            }
        }
    }

    /// One sweep over all open positions. Public so it is testable without
    /// the timer loop.
    pub async fn check_once(&self) -> Result<(), crate::domain::errors::GatewayError> {
        let positions = self.gateway.get_open_positions().await?;
        for position in positions {
            self.evaluate(&position).await;
        }
        Ok(())
    }

    async fn evaluate(&self, position: &PositionInfo) {
        let Some(profit_pct) = profit_percent(position) else {
            debug!(
                "ProfitMonitor: {} has no position value, skipping",
                position.symbol
            );
            return;
        };

        if profit_pct < self.config.threshold_pct {
            debug!(
                "ProfitMonitor: {} profit {:.2}% below threshold {:.2}%",
                position.symbol, profit_pct, self.config.threshold_pct
            );
            return;
        }

        let close_fraction =
            Decimal::from_f64_retain(self.config.close_fraction).unwrap_or(Decimal::ONE);
        let raw_close = position.size * close_fraction;

        // Respect the symbol's lot step; a close below the minimum is left
        // for the next sweep when the position is large enough.
        let close_qty = match self.gateway.get_lot_constraints(&position.symbol).await {
            Ok(lot) => {
                let quantized = quantize_to_step(raw_close, lot.qty_step);
                if quantized < lot.min_qty {
                    debug!(
                        "ProfitMonitor: close qty {} below minimum {} for {}",
                        quantized, lot.min_qty, position.symbol
                    );
                    return;
                }
                quantized
            }
            Err(e) => {
                warn!(
                    "ProfitMonitor: lot constraints unavailable for {}: {}",
                    position.symbol, e
                );
                return;
            }
        };

        info!(
            "ProfitMonitor: {} profit {:.2}% >= {:.2}%, closing {} of {}",
            position.symbol, profit_pct, self.config.threshold_pct, close_qty, position.size
        );

        match self
            .gateway
            .close_position(&position.symbol, Some(close_qty))
            .await
        {
            Ok(ack) => {
                if !self
                    .notifier
                    .send(&format!(
                        "💰 Partial close on {}: {} @ profit {:.2}% (order {})",
                        position.symbol, close_qty, profit_pct, ack.order_id
                    ))
                    .await
                {
                    warn!("ProfitMonitor: notification delivery failed");
                }
            }
            Err(e) => warn!(
                "ProfitMonitor: partial close failed for {}: {}",
                position.symbol, e
            ),
        }
    }
}

/// Unrealised profit as a percentage of position value; `None` for a
/// valueless position (nothing meaningful to measure against).
fn profit_percent(position: &PositionInfo) -> Option<f64> {
    use rust_decimal::prelude::ToPrimitive;

    if position.position_value <= Decimal::ZERO {
        return None;
    }
    let pnl = position.unrealised_pnl.to_f64()?;
    let value = position.position_value.to_f64()?;
    Some(pnl / value * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderSide;
    use crate::infrastructure::mock::{MockExchangeGateway, MockNotifier};
    use rust_decimal_macros::dec;

    fn position(symbol: &str, size: Decimal, value: Decimal, pnl: Decimal) -> PositionInfo {
        PositionInfo {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            size,
            entry_price: dec!(1),
            position_value: value,
            unrealised_pnl: pnl,
            leverage: None,
        }
    }

    fn monitor(gateway: MockExchangeGateway) -> ProfitMonitor {
        ProfitMonitor::new(
            Arc::new(gateway),
            Arc::new(MockNotifier::new()),
            ProfitMonitorConfig {
                threshold_pct: 50.0,
                close_fraction: 0.5,
                check_interval: Duration::from_secs(300),
            },
        )
    }

    #[test]
    fn test_profit_percent() {
        assert_eq!(
            profit_percent(&position("A", dec!(10), dec!(200), dec!(100))),
            Some(50.0)
        );
        assert_eq!(profit_percent(&position("A", dec!(10), dec!(0), dec!(5))), None);
    }

    #[tokio::test]
    async fn test_partial_close_above_threshold() {
        let gateway = MockExchangeGateway::new()
            .with_position(position("XYZUSDT", dec!(10), dec!(200), dec!(120)))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));
        let orders = gateway.submitted_orders();

        monitor(gateway).check_once().await.unwrap();

        let submitted = orders.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].qty, dec!(5.0));
        assert!(submitted[0].reduce_only);
        assert_eq!(submitted[0].side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_below_threshold_is_left_open() {
        let gateway = MockExchangeGateway::new()
            .with_position(position("XYZUSDT", dec!(10), dec!(200), dec!(40)))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));
        let orders = gateway.submitted_orders();

        monitor(gateway).check_once().await.unwrap();
        assert!(orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_below_lot_minimum_is_deferred() {
        let gateway = MockExchangeGateway::new()
            .with_position(position("XYZUSDT", dec!(1), dec!(200), dec!(120)))
            .with_lot_constraints("XYZUSDT", dec!(1), dec!(1), dec!(0));
        let orders = gateway.submitted_orders();

        // close fraction 0.5 -> 0.5, quantized to 0 < min 1 -> skipped
        monitor(gateway).check_once().await.unwrap();
        assert!(orders.lock().unwrap().is_empty());
    }
}
