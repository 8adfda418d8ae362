//! Position sizing and market-order submission.
//!
//! Turns an eligible (symbol, funding rate) pair into a leveraged long.
//! Every failure is returned as a typed [`TradeFailure`]; nothing here may
//! panic or leak an error past the pipeline boundary.

use crate::domain::errors::{GatewayError, TradeFailure};
use crate::domain::events::{DelistEvent, MarketOrderRequest, OrderSide, TradeRecord};
use crate::domain::ports::ExchangeGateway;
use crate::domain::sizing::quantize_to_step;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub quote_coin: String,
    pub leverage: u32,
    /// Fraction of the available balance committed as margin. The default
    /// configuration is 1.0; the whole account per trade.
    pub position_fraction: Decimal,
}

pub struct TradeExecutor {
    gateway: Arc<dyn ExchangeGateway>,
    config: ExecutorConfig,
}

impl TradeExecutor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: ExecutorConfig) -> Self {
        Self { gateway, config }
    }

    /// Open a market long on `symbol`.
    ///
    /// Sizing: margin = balance x position fraction; desired quantity =
    /// margin x leverage / last price, quantized DOWN to the symbol's lot
    /// step. A quantized quantity below the exchange minimum fails with
    /// `QuantityTooSmall`; the quantity is never silently bumped up to the
    /// minimum, which would commit more margin than was computed.
    pub async fn execute(
        &self,
        symbol: &str,
        funding_rate: f64,
        event: &DelistEvent,
    ) -> Result<TradeRecord, TradeFailure> {
        info!("TradeExecutor: executing delist trade for {}", symbol);

        let balance = self.gateway.get_balance(&self.config.quote_coin).await?;
        if balance <= Decimal::ZERO {
            return Err(TradeFailure::InsufficientBalance {
                coin: self.config.quote_coin.clone(),
                available: balance,
            });
        }

        let margin = balance * self.config.position_fraction;

        // Already-set leverage is success; anything else the exchange
        // refuses is a typed failure for this symbol only.
        match self.gateway.set_leverage(symbol, self.config.leverage).await {
            Ok(()) => {}
            Err(GatewayError::Rejection { message, .. }) => {
                return Err(TradeFailure::LeverageRejected {
                    symbol: symbol.to_string(),
                    reason: message,
                });
            }
            Err(other) => return Err(TradeFailure::Gateway(other)),
        }

        let price = self
            .gateway
            .get_last_price(symbol)
            .await?
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| TradeFailure::SymbolDataUnavailable {
                symbol: symbol.to_string(),
            })?;

        let desired_qty = margin * Decimal::from(self.config.leverage) / price;

        let lot = self.gateway.get_lot_constraints(symbol).await?;
        let qty = quantize_to_step(desired_qty, lot.qty_step);
        if qty < lot.min_qty {
            return Err(TradeFailure::QuantityTooSmall {
                symbol: symbol.to_string(),
                qty,
                min_qty: lot.min_qty,
            });
        }
        if lot.min_notional > Decimal::ZERO && qty * price < lot.min_notional {
            debug!(
                "TradeExecutor: {} order notional {} below exchange minimum {}",
                symbol,
                qty * price,
                lot.min_notional
            );
        }

        info!(
            "TradeExecutor: {} margin={} {} leverage={}x price={} qty={}",
            symbol, margin, self.config.quote_coin, self.config.leverage, price, qty
        );

        let ack = match self
            .gateway
            .submit_market_order(MarketOrderRequest {
                symbol: symbol.to_string(),
                side: OrderSide::Buy,
                qty,
                reduce_only: false,
            })
            .await
        {
            Ok(ack) => ack,
            Err(GatewayError::Rejection { message, .. }) => {
                return Err(TradeFailure::OrderRejected {
                    symbol: symbol.to_string(),
                    reason: message,
                });
            }
            Err(other) => return Err(TradeFailure::Gateway(other)),
        };

        info!(
            "TradeExecutor: order {} filled request for {} x {}",
            ack.order_id, symbol, qty
        );

        Ok(TradeRecord {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            qty,
            price,
            order_id: ack.order_id,
            leverage: self.config.leverage,
            funding_rate,
            event: event.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockExchangeGateway;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_event() -> DelistEvent {
        DelistEvent {
            tokens: vec!["XYZ".to_string()],
            detected_at: Utc::now(),
            raw_text: "Binance Will Delist XYZ".to_string(),
        }
    }

    fn executor(gateway: MockExchangeGateway) -> TradeExecutor {
        TradeExecutor::new(
            Arc::new(gateway),
            ExecutorConfig {
                quote_coin: "USDT".to_string(),
                leverage: 5,
                position_fraction: Decimal::ONE,
            },
        )
    }

    #[tokio::test]
    async fn test_successful_execution_sizes_from_balance_and_leverage() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_last_price("XYZUSDT", dec!(2.0))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));
        let orders = gateway.submitted_orders();
        let record = executor(gateway)
            .execute("XYZUSDT", -0.02, &test_event())
            .await
            .unwrap();

        // (1000 * 5) / 2.0 = 2500
        assert_eq!(record.qty, dec!(2500.0));
        assert_eq!(record.price, dec!(2.0));
        assert_eq!(record.side, OrderSide::Buy);
        assert_eq!(record.leverage, 5);
        assert_eq!(record.funding_rate, -0.02);

        let submitted = orders.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert!(!submitted[0].reduce_only);
    }

    #[tokio::test]
    async fn test_zero_balance_fails_before_any_order() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", Decimal::ZERO)
            .with_last_price("XYZUSDT", dec!(2.0))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));
        let orders = gateway.submitted_orders();

        let result = executor(gateway).execute("XYZUSDT", -0.02, &test_event()).await;
        assert!(matches!(
            result,
            Err(TradeFailure::InsufficientBalance { .. })
        ));
        assert!(orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quantity_below_minimum_is_rejected_not_clamped() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(3.9))
            .with_last_price("XYZUSDT", dec!(5.0))
            .with_lot_constraints("XYZUSDT", dec!(5), dec!(1), dec!(0));
        let orders = gateway.submitted_orders();

        // margin 3.9 x lev 5 / price 5.0 = desired 3.9; step 1 -> 3 < min 5
        let result = executor(gateway).execute("XYZUSDT", -0.02, &test_event()).await;
        match result {
            Err(TradeFailure::QuantityTooSmall { qty, min_qty, .. }) => {
                assert_eq!(qty, dec!(3));
                assert_eq!(min_qty, dec!(5));
            }
            other => panic!("expected QuantityTooSmall, got {:?}", other.map(|r| r.symbol)),
        }
        assert!(orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_price_is_symbol_data_unavailable() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0));

        let result = executor(gateway).execute("XYZUSDT", -0.02, &test_event()).await;
        assert!(matches!(
            result,
            Err(TradeFailure::SymbolDataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_leverage_already_set_is_not_a_failure() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(100))
            .with_last_price("XYZUSDT", dec!(1.0))
            .with_lot_constraints("XYZUSDT", dec!(1), dec!(1), dec!(0))
            .with_leverage_already_set();

        let record = executor(gateway)
            .execute("XYZUSDT", -0.02, &test_event())
            .await
            .unwrap();
        assert_eq!(record.qty, dec!(500));
    }

    #[tokio::test]
    async fn test_leverage_rejection_is_typed_failure() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_last_price("XYZUSDT", dec!(2.0))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0))
            .with_leverage_rejection("risk limit not supported");

        let result = executor(gateway).execute("XYZUSDT", -0.02, &test_event()).await;
        assert!(matches!(result, Err(TradeFailure::LeverageRejected { .. })));
    }

    #[tokio::test]
    async fn test_order_rejection_maps_to_typed_failure() {
        let gateway = MockExchangeGateway::new()
            .with_balance("USDT", dec!(1000))
            .with_last_price("XYZUSDT", dec!(2.0))
            .with_lot_constraints("XYZUSDT", dec!(0.1), dec!(0.1), dec!(0))
            .with_order_rejection("risk limit exceeded");

        let result = executor(gateway).execute("XYZUSDT", -0.02, &test_event()).await;
        match result {
            Err(TradeFailure::OrderRejected { reason, .. }) => {
                assert!(reason.contains("risk limit"));
            }
            other => panic!("expected OrderRejected, got {:?}", other.map(|r| r.symbol)),
        }
    }
}
