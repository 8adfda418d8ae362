use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// A raw message delivered by a [`MessageSource`](crate::domain::ports::MessageSource).
///
/// Sources guarantee at-most-once delivery by deduplicating on the
/// monotonically increasing `message_id` before handing messages over.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: i64,
    pub channel: String,
    pub text: String,
}

/// A detected exchange delisting announcement.
///
/// Immutable once created by the parser; the rest of the pipeline only
/// reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelistEvent {
    /// Base token symbols in announcement order, e.g. `["CVP", "EPX"]`.
    pub tokens: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub raw_text: String,
}

impl DelistEvent {
    /// Cooldown identity: first announced token plus the UTC calendar date
    /// the event was detected on. At most one trade may be recorded per key
    /// within the cooldown window.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}_{}",
            self.tokens.first().map(String::as_str).unwrap_or(""),
            self.detected_at.format("%Y%m%d")
        )
    }
}

/// Funding rate for one perpetual symbol. Fetched fresh per evaluation and
/// never cached; funding moves every few minutes and staleness feeds
/// straight into the trading decision.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingQuote {
    pub symbol: String,
    pub rate: f64,
}

/// Ticker row from the instrument list. `last_price` is absent for markets
/// the exchange reports without a trade print.
#[derive(Debug, Clone)]
pub struct InstrumentTicker {
    pub symbol: String,
    pub last_price: Option<Decimal>,
}

/// Order-size limits for one symbol, fetched at trade time (constraints can
/// change between trades, so these are never cached).
#[derive(Debug, Clone, PartialEq)]
pub struct LotConstraint {
    pub min_qty: Decimal,
    pub qty_step: Decimal,
    pub min_notional: Decimal,
}

/// Request for an immediate-or-cancel market order in one-way position mode.
#[derive(Debug, Clone)]
pub struct MarketOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub reduce_only: bool,
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
}

/// Open position snapshot for one symbol.
#[derive(Debug, Clone)]
pub struct PositionInfo {
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub position_value: Decimal,
    pub unrealised_pnl: Decimal,
    pub leverage: Option<Decimal>,
}

/// Produced once per successful execution and forwarded to the notifier.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub order_id: String,
    pub leverage: u32,
    pub funding_rate: f64,
    pub event: DelistEvent,
}
