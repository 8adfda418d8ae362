//! Mock collaborators for Mode::Mock and tests.
//!
//! The mock gateway is a small in-memory exchange: seeded balances, prices,
//! funding rates and lot limits, with every submitted order captured for
//! assertions. The mock source replays a scripted message list once and then
//! parks forever, which is how a quiet channel behaves.

use crate::domain::errors::{GatewayError, SourceError};
use crate::domain::events::{
    FundingQuote, InboundMessage, InstrumentTicker, LotConstraint, MarketOrderRequest, OrderAck,
    PositionInfo,
};
use crate::domain::ports::{ExchangeGateway, MessageSource, Notifier};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Default)]
pub struct MockExchangeGateway {
    balances: HashMap<String, Decimal>,
    funding_rates: Vec<FundingQuote>,
    last_prices: HashMap<String, Decimal>,
    lot_constraints: HashMap<String, LotConstraint>,
    positions: Mutex<HashMap<String, PositionInfo>>,
    orders: Arc<Mutex<Vec<MarketOrderRequest>>>,
    order_counter: AtomicU64,
    order_rejection: Option<String>,
    leverage_rejection: Option<String>,
    transport_down: bool,
}

impl MockExchangeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, coin: &str, balance: Decimal) -> Self {
        self.balances.insert(coin.to_string(), balance);
        self
    }

    pub fn with_funding_rate(mut self, symbol: &str, rate: f64) -> Self {
        self.funding_rates.push(FundingQuote {
            symbol: symbol.to_string(),
            rate,
        });
        self
    }

    pub fn with_last_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.last_prices.insert(symbol.to_string(), price);
        self
    }

    pub fn with_lot_constraints(
        mut self,
        symbol: &str,
        min_qty: Decimal,
        qty_step: Decimal,
        min_notional: Decimal,
    ) -> Self {
        self.lot_constraints.insert(
            symbol.to_string(),
            LotConstraint {
                min_qty,
                qty_step,
                min_notional,
            },
        );
        self
    }

    pub fn with_position(self, position: PositionInfo) -> Self {
        self.positions
            .lock()
            .expect("mock lock poisoned")
            .insert(position.symbol.clone(), position);
        self
    }

    /// The exchange reports "leverage not modified"; per the gateway
    /// contract that is success, so this changes nothing observable.
    pub fn with_leverage_already_set(self) -> Self {
        self
    }

    pub fn with_leverage_rejection(mut self, reason: &str) -> Self {
        self.leverage_rejection = Some(reason.to_string());
        self
    }

    pub fn with_order_rejection(mut self, reason: &str) -> Self {
        self.order_rejection = Some(reason.to_string());
        self
    }

    /// Every call fails with a transport error.
    pub fn with_transport_down(mut self) -> Self {
        self.transport_down = true;
        self
    }

    /// Handle to every order submitted through this gateway.
    pub fn submitted_orders(&self) -> Arc<Mutex<Vec<MarketOrderRequest>>> {
        Arc::clone(&self.orders)
    }

    fn check_transport(&self) -> Result<(), GatewayError> {
        if self.transport_down {
            return Err(GatewayError::transport("mock transport down"));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for MockExchangeGateway {
    async fn get_instruments(&self) -> Result<Vec<InstrumentTicker>, GatewayError> {
        self.check_transport()?;
        let mut symbols: Vec<&String> = self.last_prices.keys().collect();
        symbols.sort();
        Ok(symbols
            .into_iter()
            .map(|symbol| InstrumentTicker {
                symbol: symbol.clone(),
                last_price: self.last_prices.get(symbol).copied(),
            })
            .collect())
    }

    async fn get_funding_rates(&self) -> Result<Vec<FundingQuote>, GatewayError> {
        self.check_transport()?;
        Ok(self.funding_rates.clone())
    }

    async fn get_balance(&self, coin: &str) -> Result<Decimal, GatewayError> {
        self.check_transport()?;
        Ok(self.balances.get(coin).copied().unwrap_or(Decimal::ZERO))
    }

    async fn get_lot_constraints(&self, symbol: &str) -> Result<LotConstraint, GatewayError> {
        self.check_transport()?;
        self.lot_constraints
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::Rejection {
                code: 10001,
                message: format!("symbol not exist: {}", symbol),
            })
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), GatewayError> {
        self.check_transport()?;
        match &self.leverage_rejection {
            Some(reason) => Err(GatewayError::Rejection {
                code: 110013,
                message: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Option<Decimal>, GatewayError> {
        self.check_transport()?;
        Ok(self.last_prices.get(symbol).copied())
    }

    async fn submit_market_order(
        &self,
        request: MarketOrderRequest,
    ) -> Result<OrderAck, GatewayError> {
        self.check_transport()?;
        if let Some(reason) = &self.order_rejection {
            return Err(GatewayError::Rejection {
                code: 110007,
                message: reason.clone(),
            });
        }

        let id = self.order_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let ack = OrderAck {
            order_id: format!("mock-order-{}", id),
            symbol: request.symbol.clone(),
            side: request.side,
            qty: request.qty,
        };
        self.orders
            .lock()
            .expect("mock lock poisoned")
            .push(request);
        Ok(ack)
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionInfo>, GatewayError> {
        self.check_transport()?;
        Ok(self
            .positions
            .lock()
            .expect("mock lock poisoned")
            .get(symbol)
            .cloned())
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionInfo>, GatewayError> {
        self.check_transport()?;
        let positions = self.positions.lock().expect("mock lock poisoned");
        let mut open: Vec<PositionInfo> = positions
            .values()
            .filter(|p| p.size > Decimal::ZERO)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(open)
    }

    async fn close_position(
        &self,
        symbol: &str,
        qty: Option<Decimal>,
    ) -> Result<OrderAck, GatewayError> {
        self.check_transport()?;
        let position = self
            .get_position(symbol)
            .await?
            .ok_or_else(|| GatewayError::Rejection {
                code: 0,
                message: format!("no active position for {}", symbol),
            })?;

        let close_qty = qty.map_or(position.size, |q| q.min(position.size));
        self.submit_market_order(MarketOrderRequest {
            symbol: symbol.to_string(),
            side: position.side.opposite(),
            qty: close_qty,
            reduce_only: true,
        })
        .await
    }
}

/// Replays a scripted sequence of messages, then pends forever like a quiet
/// channel. Message ids increase monotonically from 1.
pub struct MockMessageSource {
    script: VecDeque<InboundMessage>,
}

impl MockMessageSource {
    pub fn new(channel: &str, texts: Vec<String>) -> Self {
        let script = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| InboundMessage {
                message_id: i as i64 + 1,
                channel: channel.to_string(),
                text,
            })
            .collect();
        Self { script }
    }
}

#[async_trait]
impl MessageSource for MockMessageSource {
    async fn next_message(&mut self) -> Result<InboundMessage, SourceError> {
        match self.script.pop_front() {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }
}

/// Captures notifications instead of delivering them.
#[derive(Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_messages(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, text: &str) -> bool {
        info!("MockNotifier: {}", text);
        self.sent
            .lock()
            .expect("mock lock poisoned")
            .push(text.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderSide;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_mock_gateway_orders_are_captured() {
        let gateway = MockExchangeGateway::new().with_last_price("BTCUSDT", dec!(50000));
        let orders = gateway.submitted_orders();

        let ack = gateway
            .submit_market_order(MarketOrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Buy,
                qty: dec!(0.5),
                reduce_only: false,
            })
            .await
            .unwrap();

        assert_eq!(ack.order_id, "mock-order-1");
        assert_eq!(orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_close_position_is_reduce_only_opposite_side() {
        let gateway = MockExchangeGateway::new().with_position(PositionInfo {
            symbol: "XYZUSDT".to_string(),
            side: OrderSide::Buy,
            size: dec!(10),
            entry_price: dec!(2),
            position_value: dec!(20),
            unrealised_pnl: dec!(5),
            leverage: None,
        });
        let orders = gateway.submitted_orders();

        gateway.close_position("XYZUSDT", Some(dec!(4))).await.unwrap();

        let submitted = orders.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Sell);
        assert_eq!(submitted[0].qty, dec!(4));
        assert!(submitted[0].reduce_only);
    }

    #[tokio::test]
    async fn test_mock_source_replays_script_in_order() {
        let mut source = MockMessageSource::new(
            "announcements",
            vec!["first".to_string(), "second".to_string()],
        );

        let first = source.next_message().await.unwrap();
        let second = source.next_message().await.unwrap();
        assert_eq!(first.message_id, 1);
        assert_eq!(first.text, "first");
        assert_eq!(second.message_id, 2);
    }
}
