use crate::domain::errors::{GatewayError, SourceError};
use crate::domain::events::{
    FundingQuote, InboundMessage, InstrumentTicker, LotConstraint, MarketOrderRequest, OrderAck,
    PositionInfo,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

// Need async_trait for async functions in traits
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Full linear-perpetual ticker list, one row per tradable symbol.
    async fn get_instruments(&self) -> Result<Vec<InstrumentTicker>, GatewayError>;

    /// Current funding rates for every symbol that reports one.
    async fn get_funding_rates(&self) -> Result<Vec<FundingQuote>, GatewayError>;

    /// Wallet balance for `coin` on the unified account.
    async fn get_balance(&self, coin: &str) -> Result<Decimal, GatewayError>;

    /// Lot-size limits for `symbol`, fetched fresh at trade time.
    async fn get_lot_constraints(&self, symbol: &str) -> Result<LotConstraint, GatewayError>;

    /// Set leverage on both sides of `symbol`. "Leverage not modified" from
    /// the exchange counts as success.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError>;

    /// Last traded price, `None` when the symbol is unknown or has no print.
    async fn get_last_price(&self, symbol: &str) -> Result<Option<Decimal>, GatewayError>;

    async fn submit_market_order(
        &self,
        request: MarketOrderRequest,
    ) -> Result<OrderAck, GatewayError>;

    /// Open position for `symbol`, `None` when flat or the symbol does not
    /// exist on the exchange.
    async fn get_position(&self, symbol: &str) -> Result<Option<PositionInfo>, GatewayError>;

    /// All open positions settling in the quote coin.
    async fn get_open_positions(&self) -> Result<Vec<PositionInfo>, GatewayError>;

    /// Close the open position with a reduce-only market order. `qty = None`
    /// closes the full size; a larger requested qty is capped at the
    /// position size.
    async fn close_position(
        &self,
        symbol: &str,
        qty: Option<Decimal>,
    ) -> Result<OrderAck, GatewayError>;
}

/// A stream of raw channel messages. Implementations own their transport
/// (long-polling, persistent session, scripted replay) and must deliver each
/// message at most once, deduplicating on the monotonically increasing
/// message id even if the transport redelivers.
#[async_trait]
pub trait MessageSource: Send {
    async fn next_message(&mut self) -> Result<InboundMessage, SourceError>;
}

/// Best-effort outbound notification. A `false` return is logged by the
/// caller and otherwise ignored; delivery failure must never block a trade.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> bool;
}
