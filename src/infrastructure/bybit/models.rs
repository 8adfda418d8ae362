//! Bybit V5 REST response shapes.
//!
//! Every endpoint is decoded once here into typed payloads; nothing
//! downstream touches raw JSON. Bybit serializes numbers as strings and
//! uses the empty string for "no value".

use rust_decimal::Decimal;
use serde::Deserialize;

/// Envelope common to every V5 endpoint.
#[derive(Debug, Deserialize)]
pub struct RestEnvelope<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

/// `result` wrapper for list-shaped endpoints.
#[derive(Debug, Deserialize)]
pub struct ListResult<T> {
    #[serde(default)]
    pub list: Vec<T>,
}

/// Row of `/v5/market/tickers?category=linear`.
#[derive(Debug, Deserialize, Default)]
pub struct TickerItem {
    pub symbol: String,
    #[serde(rename = "lastPrice", default)]
    pub last_price: String,
    #[serde(rename = "fundingRate", default)]
    pub funding_rate: String,
}

/// Row of `/v5/market/instruments-info`.
#[derive(Debug, Deserialize, Default)]
pub struct InstrumentInfoItem {
    pub symbol: String,
    #[serde(rename = "lotSizeFilter", default)]
    pub lot_size_filter: LotSizeFilter,
    #[serde(rename = "minOrderValue", default)]
    pub min_order_value: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct LotSizeFilter {
    #[serde(rename = "minOrderQty", default)]
    pub min_order_qty: String,
    #[serde(rename = "qtyStep", default)]
    pub qty_step: String,
}

/// `/v5/account/wallet-balance` account entry.
#[derive(Debug, Deserialize, Default)]
pub struct WalletAccount {
    #[serde(rename = "totalWalletBalance", default)]
    pub total_wallet_balance: String,
    #[serde(default)]
    pub coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
pub struct WalletCoin {
    #[serde(default)]
    pub coin: String,
    #[serde(rename = "walletBalance", default)]
    pub wallet_balance: String,
}

/// `/v5/position/list` row.
#[derive(Debug, Deserialize, Default)]
pub struct PositionItem {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(rename = "avgPrice", default)]
    pub avg_price: String,
    #[serde(rename = "positionValue", default)]
    pub position_value: String,
    #[serde(rename = "unrealisedPnl", default)]
    pub unrealised_pnl: String,
    #[serde(default)]
    pub leverage: String,
}

/// `/v5/order/create` result payload.
#[derive(Debug, Deserialize)]
pub struct OrderResult {
    #[serde(rename = "orderId", default)]
    pub order_id: String,
}

/// Parse a Bybit string-number; the empty string means absent.
pub fn opt_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    s.parse::<Decimal>().ok()
}

pub fn opt_f64(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_envelope_decodes_ticker_list() {
        let json = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "linear",
                "list": [
                    {"symbol": "BTCUSDT", "lastPrice": "50000.5", "fundingRate": "-0.0123"},
                    {"symbol": "NEWUSDT", "lastPrice": "", "fundingRate": ""}
                ]
            }
        }"#;

        let envelope: RestEnvelope<ListResult<TickerItem>> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.ret_code, 0);
        let list = envelope.result.unwrap().list;
        assert_eq!(list.len(), 2);
        assert_eq!(opt_decimal(&list[0].last_price), Some(dec!(50000.5)));
        assert_eq!(opt_f64(&list[0].funding_rate), Some(-0.0123));
        assert_eq!(opt_decimal(&list[1].last_price), None);
    }

    #[test]
    fn test_envelope_decodes_error_without_result() {
        let json = r#"{"retCode": 10001, "retMsg": "symbol not exist"}"#;
        let envelope: RestEnvelope<ListResult<TickerItem>> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.ret_code, 10001);
        assert!(envelope.result.is_none());
    }

    #[test]
    fn test_instrument_info_lot_filter() {
        let json = r#"{
            "symbol": "XYZUSDT",
            "lotSizeFilter": {"minOrderQty": "0.1", "qtyStep": "0.1", "maxOrderQty": "100000"},
            "minOrderValue": "5"
        }"#;
        let item: InstrumentInfoItem = serde_json::from_str(json).unwrap();
        assert_eq!(opt_decimal(&item.lot_size_filter.min_order_qty), Some(dec!(0.1)));
        assert_eq!(opt_decimal(&item.min_order_value), Some(dec!(5)));
    }
}
