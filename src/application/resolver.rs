//! Token-to-symbol resolution cache.
//!
//! Maps base token names ("SHIB") to the tradable perpetual symbols that
//! carry them ("1000SHIBUSDT"). The mapping is rebuilt wholesale from the
//! exchange instrument list and swapped in atomically, so concurrent
//! lookups never observe a half-built cache.

use crate::domain::errors::GatewayError;
use crate::domain::ports::ExchangeGateway;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Quote/contract suffixes tried in priority order when recovering the base
/// token from a symbol; first match wins. The leading entry handles
/// numeric-prefixed contracts like 1000SHIBUSDT.
const QUOTE_SUFFIXES: &[&str] = &["USDT", "USD", "PERP", "USDC"];

pub struct SymbolResolver {
    gateway: Arc<dyn ExchangeGateway>,
    mapping: RwLock<HashMap<String, Vec<String>>>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl SymbolResolver {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            gateway,
            mapping: RwLock::new(HashMap::new()),
            last_refreshed: RwLock::new(None),
        }
    }

    /// Rebuild the mapping from the full instrument list.
    ///
    /// The replacement map is built completely before the write lock is
    /// taken; a failed fetch leaves the previous mapping in place
    /// (stale-but-available beats empty).
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let instruments = self.gateway.get_instruments().await?;

        let mut next: HashMap<String, Vec<String>> = HashMap::new();
        for instrument in &instruments {
            if let Some(token) = base_token(&instrument.symbol) {
                next.entry(token).or_default().push(instrument.symbol.clone());
            } else {
                debug!("SymbolResolver: no base token for symbol {}", instrument.symbol);
            }
        }

        let tokens = next.len();
        let symbols: usize = next.values().map(Vec::len).sum();

        *self.mapping.write().await = next;
        *self.last_refreshed.write().await = Some(Utc::now());

        info!(
            "SymbolResolver: mapping refreshed ({} tokens, {} symbols)",
            tokens, symbols
        );
        Ok(())
    }

    /// Tradable symbols for the given tokens, in token order. Tokens with no
    /// mapping contribute nothing and are logged as warnings; an unknown
    /// token is an expected outcome for markets the exchange never carried.
    pub async fn lookup(&self, tokens: &[String]) -> Vec<String> {
        let mapping = self.mapping.read().await;
        let mut symbols = Vec::new();

        for token in tokens {
            match mapping.get(&token.to_uppercase()) {
                Some(bucket) => {
                    for symbol in bucket {
                        debug!("SymbolResolver: {} -> {}", token, symbol);
                        symbols.push(symbol.clone());
                    }
                }
                None => warn!("SymbolResolver: no trading pair found for token {}", token),
            }
        }

        symbols
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed.read().await
    }

    pub async fn token_count(&self) -> usize {
        self.mapping.read().await.len()
    }
}

/// Recover the base token from a perpetual symbol by stripping a quote
/// suffix, trying the suffix patterns in priority order. Symbols that match
/// none of the patterns yield `None` and are left out of the mapping.
fn base_token(symbol: &str) -> Option<String> {
    for suffix in QUOTE_SUFFIXES {
        if let Some(stem) = symbol.strip_suffix(suffix) {
            if stem.is_empty() {
                continue;
            }
            // 1000SHIBUSDT -> SHIB: drop the numeric multiplier prefix.
            if *suffix == "USDT" {
                let unprefixed = stem.trim_start_matches(|c: char| c.is_ascii_digit());
                if unprefixed.len() < stem.len() && !unprefixed.is_empty() {
                    return Some(unprefixed.to_uppercase());
                }
            }
            return Some(stem.to_uppercase());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{
        FundingQuote, InstrumentTicker, LotConstraint, MarketOrderRequest, OrderAck, PositionInfo,
    };
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    struct FixedInstrumentGateway {
        symbols: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl ExchangeGateway for FixedInstrumentGateway {
        async fn get_instruments(&self) -> Result<Vec<InstrumentTicker>, GatewayError> {
            if self.fail {
                return Err(GatewayError::transport("simulated outage"));
            }
            Ok(self
                .symbols
                .iter()
                .map(|s| InstrumentTicker {
                    symbol: s.to_string(),
                    last_price: None,
                })
                .collect())
        }

        async fn get_funding_rates(&self) -> Result<Vec<FundingQuote>, GatewayError> {
            Ok(Vec::new())
        }

        async fn get_balance(&self, _coin: &str) -> Result<Decimal, GatewayError> {
            Ok(Decimal::ZERO)
        }

        async fn get_lot_constraints(&self, _symbol: &str) -> Result<LotConstraint, GatewayError> {
            unimplemented!()
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn get_last_price(&self, _symbol: &str) -> Result<Option<Decimal>, GatewayError> {
            Ok(None)
        }

        async fn submit_market_order(
            &self,
            _request: MarketOrderRequest,
        ) -> Result<OrderAck, GatewayError> {
            unimplemented!()
        }

        async fn get_position(&self, _symbol: &str) -> Result<Option<PositionInfo>, GatewayError> {
            Ok(None)
        }

        async fn get_open_positions(&self) -> Result<Vec<PositionInfo>, GatewayError> {
            Ok(Vec::new())
        }

        async fn close_position(
            &self,
            _symbol: &str,
            _qty: Option<Decimal>,
        ) -> Result<OrderAck, GatewayError> {
            unimplemented!()
        }
    }

    #[test]
    fn test_base_token_suffix_priority() {
        assert_eq!(base_token("1000SHIBUSDT"), Some("SHIB".to_string()));
        assert_eq!(base_token("BTCUSDT"), Some("BTC".to_string()));
        assert_eq!(base_token("ETHUSD"), Some("ETH".to_string()));
        assert_eq!(base_token("BTCPERP"), Some("BTC".to_string()));
        assert_eq!(base_token("BTCUSDC"), Some("BTC".to_string()));
        assert_eq!(base_token("WEIRDPAIR"), None);
        assert_eq!(base_token("USDT"), None);
    }

    #[tokio::test]
    async fn test_lookup_after_refresh() {
        let gateway = Arc::new(FixedInstrumentGateway {
            symbols: vec!["1000SHIBUSDT", "BTCUSDT", "ETHUSD"],
            fail: false,
        });
        let resolver = SymbolResolver::new(gateway);
        resolver.refresh().await.unwrap();

        assert_eq!(
            resolver.lookup(&["SHIB".to_string()]).await,
            vec!["1000SHIBUSDT"]
        );
        assert_eq!(resolver.lookup(&["BTC".to_string()]).await, vec!["BTCUSDT"]);
        assert_eq!(resolver.lookup(&["ETH".to_string()]).await, vec!["ETHUSD"]);
        assert!(resolver.last_refreshed().await.is_some());
    }

    #[tokio::test]
    async fn test_lookup_unknown_token_is_empty_not_error() {
        let gateway = Arc::new(FixedInstrumentGateway {
            symbols: vec!["BTCUSDT"],
            fail: false,
        });
        let resolver = SymbolResolver::new(gateway);
        resolver.refresh().await.unwrap();

        assert!(resolver.lookup(&["NOPE".to_string()]).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_mapping() {
        let good = Arc::new(FixedInstrumentGateway {
            symbols: vec!["BTCUSDT"],
            fail: false,
        });
        let resolver = SymbolResolver::new(good);
        resolver.refresh().await.unwrap();

        // A resolver whose gateway is down reports the error and never
        // stamps a refresh time.
        let bad = SymbolResolver::new(Arc::new(FixedInstrumentGateway {
            symbols: vec![],
            fail: true,
        }));
        assert!(bad.refresh().await.is_err());
        assert!(bad.last_refreshed().await.is_none());

        // The successful resolver still serves its snapshot.
        assert_eq!(resolver.lookup(&["BTC".to_string()]).await, vec!["BTCUSDT"]);
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive_on_tokens() {
        let gateway = Arc::new(FixedInstrumentGateway {
            symbols: vec!["REEFUSDT"],
            fail: false,
        });
        let resolver = SymbolResolver::new(gateway);
        resolver.refresh().await.unwrap();

        assert_eq!(
            resolver.lookup(&["reef".to_string()]).await,
            vec!["REEFUSDT"]
        );
    }
}
