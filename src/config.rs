use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Live,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

/// How announcement messages are ingested: Bot API long-polling or a
/// persistent WebSocket feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Polling,
    Stream,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "polling" => Ok(SourceKind::Polling),
            "stream" => Ok(SourceKind::Stream),
            _ => anyhow::bail!("Invalid SOURCE_KIND: {}. Must be 'polling' or 'stream'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub source_kind: SourceKind,
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub announcement_channel: String,
    pub poll_pause_seconds: u64,
    // Announcement feed (SOURCE_KIND=stream)
    pub feed_ws_url: String,
    // Bybit
    pub bybit_base_url: String,
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub bybit_recv_window_ms: u64,
    // Trading
    pub quote_coin: String,
    pub leverage: u32,
    pub position_fraction: Decimal,
    pub funding_threshold: f64,
    pub max_trades_per_event: usize,
    pub cooldown_hours: u64,
    pub symbol_refresh_seconds: u64,
    // Profit monitor (optional utility, off by default)
    pub profit_monitor_enabled: bool,
    pub profit_threshold_pct: f64,
    pub profit_close_fraction: f64,
    pub profit_check_interval_seconds: u64,
    // Observability
    pub observability_enabled: bool,
    pub observability_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "live".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let source_kind_str = env::var("SOURCE_KIND").unwrap_or_else(|_| "polling".to_string());
        let source_kind = SourceKind::from_str(&source_kind_str)?;

        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_chat_id = env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
        let announcement_channel =
            env::var("ANNOUNCEMENT_CHANNEL").unwrap_or_else(|_| "BWEnews_JP".to_string());

        let poll_pause_seconds = env::var("POLL_PAUSE_SECONDS")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u64>()
            .context("Failed to parse POLL_PAUSE_SECONDS")?;

        let feed_ws_url = env::var("FEED_WS_URL").unwrap_or_default();

        let bybit_base_url =
            env::var("BYBIT_BASE_URL").unwrap_or_else(|_| "https://api.bybit.com".to_string());
        let bybit_api_key = env::var("BYBIT_API_KEY").unwrap_or_default();
        let bybit_api_secret = env::var("BYBIT_API_SECRET").unwrap_or_default();

        let bybit_recv_window_ms = env::var("BYBIT_RECV_WINDOW_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u64>()
            .context("Failed to parse BYBIT_RECV_WINDOW_MS")?;

        let quote_coin = env::var("QUOTE_COIN").unwrap_or_else(|_| "USDT".to_string());

        let leverage = env::var("LEVERAGE")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()
            .context("Failed to parse LEVERAGE")?;
        anyhow::ensure!(leverage >= 1, "LEVERAGE must be at least 1");

        // Fraction of the available balance committed per trade. The default
        // is deliberately all-in: the strategy sizes the whole account into
        // a single delisting event.
        let position_fraction = env::var("POSITION_FRACTION")
            .unwrap_or_else(|_| "1.0".to_string())
            .parse::<Decimal>()
            .context("Failed to parse POSITION_FRACTION")?;
        anyhow::ensure!(
            position_fraction > Decimal::ZERO && position_fraction <= Decimal::ONE,
            "POSITION_FRACTION must be in (0, 1]"
        );

        let funding_threshold = env::var("FUNDING_THRESHOLD")
            .unwrap_or_else(|_| "-0.01".to_string())
            .parse::<f64>()
            .context("Failed to parse FUNDING_THRESHOLD")?;

        let max_trades_per_event = env::var("MAX_TRADES_PER_EVENT")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<usize>()
            .context("Failed to parse MAX_TRADES_PER_EVENT")?;

        let cooldown_hours = env::var("COOLDOWN_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse::<u64>()
            .context("Failed to parse COOLDOWN_HOURS")?;

        let symbol_refresh_seconds = env::var("SYMBOL_REFRESH_SECONDS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .context("Failed to parse SYMBOL_REFRESH_SECONDS")?;

        let profit_monitor_enabled = env::var("PROFIT_MONITOR_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let profit_threshold_pct = env::var("PROFIT_THRESHOLD_PCT")
            .unwrap_or_else(|_| "50.0".to_string())
            .parse::<f64>()
            .context("Failed to parse PROFIT_THRESHOLD_PCT")?;

        let profit_close_fraction = env::var("PROFIT_CLOSE_FRACTION")
            .unwrap_or_else(|_| "0.5".to_string())
            .parse::<f64>()
            .context("Failed to parse PROFIT_CLOSE_FRACTION")?;
        anyhow::ensure!(
            profit_close_fraction > 0.0 && profit_close_fraction <= 1.0,
            "PROFIT_CLOSE_FRACTION must be in (0, 1]"
        );

        let profit_check_interval_seconds = env::var("PROFIT_CHECK_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse PROFIT_CHECK_INTERVAL_SECONDS")?;

        let observability_enabled = env::var("OBSERVABILITY_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let observability_interval_seconds = env::var("OBSERVABILITY_INTERVAL")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("Failed to parse OBSERVABILITY_INTERVAL")?;

        if mode == Mode::Live {
            anyhow::ensure!(
                !telegram_bot_token.is_empty() || source_kind == SourceKind::Stream,
                "TELEGRAM_BOT_TOKEN is required when SOURCE_KIND=polling"
            );
            anyhow::ensure!(
                source_kind == SourceKind::Polling || !feed_ws_url.is_empty(),
                "FEED_WS_URL is required when SOURCE_KIND=stream"
            );
        }

        Ok(Self {
            mode,
            source_kind,
            telegram_bot_token,
            telegram_chat_id,
            announcement_channel,
            poll_pause_seconds,
            feed_ws_url,
            bybit_base_url,
            bybit_api_key,
            bybit_api_secret,
            bybit_recv_window_ms,
            quote_coin,
            leverage,
            position_fraction,
            funding_threshold,
            max_trades_per_event,
            cooldown_hours,
            symbol_refresh_seconds,
            profit_monitor_enabled,
            profit_threshold_pct,
            profit_close_fraction,
            profit_check_interval_seconds,
            observability_enabled,
            observability_interval_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(Mode::from_str("mock").unwrap(), Mode::Mock);
        assert_eq!(Mode::from_str("LIVE").unwrap(), Mode::Live);
        assert!(Mode::from_str("paper").is_err());
    }

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!(SourceKind::from_str("polling").unwrap(), SourceKind::Polling);
        assert_eq!(SourceKind::from_str("Stream").unwrap(), SourceKind::Stream);
        assert!(SourceKind::from_str("webhook").is_err());
    }
}
