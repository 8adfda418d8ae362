//! Bybit V5 REST gateway.
//!
//! Implements the `ExchangeGateway` port against the linear-perpetual API.
//! Private calls are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + (query_string | json_body)` and run
//! behind a circuit breaker. Responses are decoded once into the typed
//! models; retCode taxonomy is mapped to `GatewayError` here and nowhere
//! else.

use crate::domain::errors::GatewayError;
use crate::domain::events::{
    FundingQuote, InstrumentTicker, LotConstraint, MarketOrderRequest, OrderAck, OrderSide,
    PositionInfo,
};
use crate::domain::ports::ExchangeGateway;
use crate::domain::sizing::quantize_to_step;
use crate::infrastructure::bybit::models::{
    InstrumentInfoItem, ListResult, OrderResult, PositionItem, RestEnvelope, TickerItem,
    WalletAccount, opt_decimal, opt_f64,
};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::{
    HttpClientFactory, encode_query, url_with_query,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const LINEAR: &str = "linear";

/// retCode values Bybit uses for credential/signature problems.
const AUTH_RET_CODES: &[i64] = &[10003, 10004, 10005, 10007, 33004];

/// "Leverage not modified"; requesting the already-set value is success.
const RET_LEVERAGE_NOT_MODIFIED: i64 = 110043;

/// "Symbol not exist"; a business miss, not a failure.
const RET_SYMBOL_NOT_EXIST: i64 = 10001;

pub struct BybitGateway {
    /// Retrying client for idempotent reads.
    client: ClientWithMiddleware,
    /// Non-retrying client for order placement.
    order_client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window: String,
    breaker: Arc<CircuitBreaker>,
}

impl BybitGateway {
    pub fn new(base_url: String, api_key: String, api_secret: String, recv_window_ms: u64) -> Self {
        if api_key.is_empty() || api_secret.is_empty() {
            warn!("BybitGateway: API credentials not set; private calls will be rejected");
        }

        Self {
            client: HttpClientFactory::create_client(),
            order_client: HttpClientFactory::create_transactional_client(),
            base_url,
            api_key,
            api_secret,
            recv_window: recv_window_ms.to_string(),
            breaker: Arc::new(CircuitBreaker::new("BybitGateway", 5, 3, Duration::from_secs(60))),
        }
    }

    /// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`, where
    /// payload is the URL-encoded query string for GET and the serialized
    /// JSON body for POST.
    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(self.recv_window.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let query = encode_query(params);
        let url = url_with_query(&format!("{}{}", self.base_url, path), &query);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        decode_response(response).await
    }

    async fn private_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let query = encode_query(params);
        let url = url_with_query(&format!("{}{}", self.base_url, path), &query);
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &query);

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        decode_response(response).await
    }

    async fn private_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let body_str = body.to_string();
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &body_str);

        debug!("BybitGateway: POST {} body {}", path, body_str);

        let response = self
            .order_client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window)
            .header("X-BAPI-SIGN", signature)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body_str)
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        decode_response(response).await
    }

    async fn fetch_tickers(&self, symbol: Option<&str>) -> Result<Vec<TickerItem>, GatewayError> {
        let result: ListResult<TickerItem> = match symbol {
            Some(symbol) => {
                self.public_get(
                    "/v5/market/tickers",
                    &[("category", LINEAR), ("symbol", symbol)],
                )
                .await?
            }
            None => {
                self.public_get("/v5/market/tickers", &[("category", LINEAR)])
                    .await?
            }
        };
        Ok(result.list)
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>, GatewayError> {
        let result: Result<ListResult<PositionItem>, GatewayError> = self
            .private_get(
                "/v5/position/list",
                &[("category", LINEAR), ("symbol", symbol)],
            )
            .await;

        match result {
            Ok(list) => Ok(list.list.into_iter().find_map(into_position)),
            Err(GatewayError::Rejection {
                code: RET_SYMBOL_NOT_EXIST,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ExchangeGateway for BybitGateway {
    async fn get_instruments(&self) -> Result<Vec<InstrumentTicker>, GatewayError> {
        let tickers = self.fetch_tickers(None).await?;
        info!("BybitGateway: retrieved {} linear tickers", tickers.len());
        Ok(tickers
            .into_iter()
            .map(|item| InstrumentTicker {
                last_price: opt_decimal(&item.last_price),
                symbol: item.symbol,
            })
            .collect())
    }

    async fn get_funding_rates(&self) -> Result<Vec<FundingQuote>, GatewayError> {
        let tickers = self.fetch_tickers(None).await?;
        let quotes: Vec<FundingQuote> = tickers
            .into_iter()
            .filter_map(|item| {
                opt_f64(&item.funding_rate).map(|rate| FundingQuote {
                    symbol: item.symbol,
                    rate,
                })
            })
            .collect();
        info!("BybitGateway: fetched {} funding rates", quotes.len());
        Ok(quotes)
    }

    async fn get_balance(&self, coin: &str) -> Result<Decimal, GatewayError> {
        let result: ListResult<WalletAccount> = flatten_breaker(
            self.breaker
                .call(self.private_get(
                    "/v5/account/wallet-balance",
                    &[("accountType", "UNIFIED"), ("coin", coin)],
                ))
                .await,
        )?;

        let Some(account) = result.list.into_iter().next() else {
            warn!("BybitGateway: wallet balance response had no account entry");
            return Ok(Decimal::ZERO);
        };

        for entry in &account.coin {
            if entry.coin == coin {
                if let Some(balance) = opt_decimal(&entry.wallet_balance) {
                    return Ok(balance);
                }
            }
        }

        // Fall back to the account total when the coin row is absent.
        Ok(opt_decimal(&account.total_wallet_balance).unwrap_or(Decimal::ZERO))
    }

    async fn get_lot_constraints(&self, symbol: &str) -> Result<LotConstraint, GatewayError> {
        let result: ListResult<InstrumentInfoItem> = self
            .public_get(
                "/v5/market/instruments-info",
                &[("category", LINEAR), ("symbol", symbol)],
            )
            .await?;

        let Some(info) = result.list.into_iter().next() else {
            return Err(GatewayError::Rejection {
                code: RET_SYMBOL_NOT_EXIST,
                message: format!("no instrument info for {}", symbol),
            });
        };

        Ok(LotConstraint {
            min_qty: opt_decimal(&info.lot_size_filter.min_order_qty).unwrap_or(Decimal::ZERO),
            qty_step: opt_decimal(&info.lot_size_filter.qty_step)
                .unwrap_or_else(|| Decimal::new(1, 3)),
            min_notional: opt_decimal(&info.min_order_value).unwrap_or(Decimal::ZERO),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "category": LINEAR,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });

        let result: Result<serde_json::Value, GatewayError> = flatten_breaker(
            self.breaker
                .call(self.private_post("/v5/position/set-leverage", body))
                .await,
        );

        match result {
            Ok(_) => {
                info!("BybitGateway: leverage set to {}x for {}", leverage, symbol);
                Ok(())
            }
            Err(GatewayError::Rejection { code, message })
                if code == RET_LEVERAGE_NOT_MODIFIED
                    || message.to_lowercase().contains("leverage not modified") =>
            {
                info!(
                    "BybitGateway: leverage already {}x for {}, skipping",
                    leverage, symbol
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Option<Decimal>, GatewayError> {
        match self.fetch_tickers(Some(symbol)).await {
            Ok(tickers) => Ok(tickers
                .into_iter()
                .find(|item| item.symbol == symbol)
                .and_then(|item| opt_decimal(&item.last_price))),
            Err(GatewayError::Rejection {
                code: RET_SYMBOL_NOT_EXIST,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn submit_market_order(
        &self,
        request: MarketOrderRequest,
    ) -> Result<OrderAck, GatewayError> {
        let body = serde_json::json!({
            "category": LINEAR,
            "symbol": request.symbol,
            "side": request.side.to_string(),
            "orderType": "Market",
            "qty": request.qty.to_string(),
            "timeInForce": "IOC",
            "positionIdx": 0,
            "reduceOnly": request.reduce_only,
            "orderLinkId": uuid::Uuid::new_v4().to_string(),
        });

        info!(
            "BybitGateway: placing {} market order for {} {}",
            request.side, request.qty, request.symbol
        );

        let result: OrderResult = flatten_breaker(
            self.breaker
                .call(self.private_post("/v5/order/create", body))
                .await,
        )?;

        info!("BybitGateway: order accepted, id {}", result.order_id);
        Ok(OrderAck {
            order_id: result.order_id,
            symbol: request.symbol,
            side: request.side,
            qty: request.qty,
        })
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionInfo>, GatewayError> {
        flatten_breaker(self.breaker.call(self.fetch_position(symbol)).await)
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionInfo>, GatewayError> {
        let result: ListResult<PositionItem> = flatten_breaker(
            self.breaker
                .call(self.private_get(
                    "/v5/position/list",
                    &[("category", LINEAR), ("settleCoin", "USDT"), ("limit", "50")],
                ))
                .await,
        )?;

        Ok(result.list.into_iter().filter_map(into_position).collect())
    }

    async fn close_position(
        &self,
        symbol: &str,
        qty: Option<Decimal>,
    ) -> Result<OrderAck, GatewayError> {
        let Some(position) = self.get_position(symbol).await? else {
            return Err(GatewayError::Rejection {
                code: 0,
                message: format!("no active position for {}", symbol),
            });
        };

        let requested = qty.map_or(position.size, |q| q.min(position.size));

        let lot = self.get_lot_constraints(symbol).await?;
        let close_qty = quantize_to_step(requested, lot.qty_step);
        if close_qty < lot.min_qty {
            return Err(GatewayError::Rejection {
                code: 0,
                message: format!(
                    "close quantity {} below minimum {} for {}",
                    close_qty, lot.min_qty, symbol
                ),
            });
        }

        info!(
            "BybitGateway: closing {} of {} position on {}",
            close_qty, position.size, symbol
        );

        self.submit_market_order(MarketOrderRequest {
            symbol: symbol.to_string(),
            side: position.side.opposite(),
            qty: close_qty,
            reduce_only: true,
        })
        .await
    }
}

/// Map HTTP status and the V5 envelope to `GatewayError`, returning the
/// decoded payload on retCode 0.
async fn decode_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(GatewayError::Auth {
            reason: format!("HTTP {}", status),
        });
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(GatewayError::transport(format!("HTTP {}: {}", status, text)));
    }

    let envelope: RestEnvelope<T> = response
        .json()
        .await
        .map_err(|e| GatewayError::transport(format!("response decode failed: {}", e)))?;

    if envelope.ret_code != 0 {
        if AUTH_RET_CODES.contains(&envelope.ret_code) {
            return Err(GatewayError::Auth {
                reason: format!("retCode {}: {}", envelope.ret_code, envelope.ret_msg),
            });
        }
        return Err(GatewayError::Rejection {
            code: envelope.ret_code,
            message: envelope.ret_msg,
        });
    }

    envelope
        .result
        .ok_or_else(|| GatewayError::transport("retCode 0 with empty result"))
}

fn flatten_breaker<T>(result: Result<T, CircuitBreakerError<GatewayError>>) -> Result<T, GatewayError> {
    match result {
        Ok(value) => Ok(value),
        Err(CircuitBreakerError::Open(reason)) => Err(GatewayError::Transport { reason }),
        Err(CircuitBreakerError::Inner(inner)) => Err(inner),
    }
}

/// Convert a raw position row; flat rows (side "None", zero size) are
/// filtered out here.
fn into_position(item: PositionItem) -> Option<PositionInfo> {
    let side = match item.side.as_str() {
        "Buy" => OrderSide::Buy,
        "Sell" => OrderSide::Sell,
        _ => return None,
    };
    let size = opt_decimal(&item.size)?;
    if size <= Decimal::ZERO {
        return None;
    }

    Some(PositionInfo {
        symbol: item.symbol,
        side,
        size,
        entry_price: opt_decimal(&item.avg_price).unwrap_or(Decimal::ZERO),
        position_value: opt_decimal(&item.position_value).unwrap_or(Decimal::ZERO),
        unrealised_pnl: opt_decimal(&item.unrealised_pnl).unwrap_or(Decimal::ZERO),
        leverage: opt_decimal(&item.leverage),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> BybitGateway {
        BybitGateway::new(
            "https://api.bybit.com".to_string(),
            "test_key".to_string(),
            "test_secret".to_string(),
            5000,
        )
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let signature = gateway().sign("1700000000000", "category=linear&symbol=BTCUSDT");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_depends_on_payload_and_timestamp() {
        let gw = gateway();
        let a = gw.sign("1700000000000", "category=linear");
        let b = gw.sign("1700000000000", "category=linear&symbol=BTCUSDT");
        let c = gw.sign("1700000000001", "category=linear");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_into_position_filters_flat_rows() {
        let flat = PositionItem {
            symbol: "BTCUSDT".to_string(),
            side: "None".to_string(),
            size: "0".to_string(),
            avg_price: String::new(),
            position_value: String::new(),
            unrealised_pnl: String::new(),
            leverage: String::new(),
        };
        assert!(into_position(flat).is_none());

        let open = PositionItem {
            symbol: "BTCUSDT".to_string(),
            side: "Buy".to_string(),
            size: "0.5".to_string(),
            avg_price: "50000".to_string(),
            position_value: "25000".to_string(),
            unrealised_pnl: "120".to_string(),
            leverage: "5".to_string(),
        };
        let position = into_position(open).unwrap();
        assert_eq!(position.side, OrderSide::Buy);
        assert_eq!(position.size.to_string(), "0.5");
    }
}
