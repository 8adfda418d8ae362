use rust_decimal::Decimal;
use thiserror::Error;

/// Failures surfaced by the exchange gateway, split so callers can tell a
/// flaky network apart from a rejected credential or a business "no".
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport failure: {reason}")]
    Transport { reason: String },

    #[error("authentication rejected: {reason}")]
    Auth { reason: String },

    #[error("exchange rejected request (code {code}): {message}")]
    Rejection { code: i64, message: String },
}

impl GatewayError {
    pub fn transport(reason: impl Into<String>) -> Self {
        GatewayError::Transport {
            reason: reason.into(),
        }
    }

    /// Only transport failures are worth a blind retry; auth and business
    /// rejections will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }
}

/// Failures from a message source. Transport errors trigger the ingestion
/// loop's capped backoff; `Closed` ends ingestion.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("message transport failure: {reason}")]
    Transport { reason: String },

    #[error("message source closed")]
    Closed,
}

impl SourceError {
    pub fn transport(reason: impl Into<String>) -> Self {
        SourceError::Transport {
            reason: reason.into(),
        }
    }
}

/// Typed outcome of a failed trade attempt. Every variant is a normal,
/// loggable result for the pipeline; none of them may crash the
/// monitoring loop.
#[derive(Debug, Error)]
pub enum TradeFailure {
    #[error("insufficient balance: {available} {coin} available")]
    InsufficientBalance { coin: String, available: Decimal },

    #[error("no market data for {symbol}")]
    SymbolDataUnavailable { symbol: String },

    #[error("order quantity too small for {symbol}: {qty} < min {min_qty}")]
    QuantityTooSmall {
        symbol: String,
        qty: Decimal,
        min_qty: Decimal,
    },

    #[error("leverage change rejected for {symbol}: {reason}")]
    LeverageRejected { symbol: String, reason: String },

    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryability_split() {
        assert!(GatewayError::transport("connection reset").is_retryable());
        assert!(
            !GatewayError::Auth {
                reason: "bad signature".to_string()
            }
            .is_retryable()
        );
        assert!(
            !GatewayError::Rejection {
                code: 10001,
                message: "symbol not exist".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_trade_failure_formatting() {
        let failure = TradeFailure::QuantityTooSmall {
            symbol: "XYZUSDT".to_string(),
            qty: dec!(3),
            min_qty: dec!(5),
        };
        let msg = failure.to_string();
        assert!(msg.contains("XYZUSDT"));
        assert!(msg.contains("3 < min 5"));
    }
}
