//! Funding-rate eligibility filter.
//!
//! A delisting announcement only becomes a trade when the perpetual's
//! funding is deeply negative; the short side is crowded and pays the
//! longs. Rates are fetched fresh on every evaluation; funding reprices
//! every few minutes and a stale rate is worse than no rate.

use crate::domain::errors::GatewayError;
use crate::domain::ports::ExchangeGateway;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct EligibilityFilter {
    gateway: Arc<dyn ExchangeGateway>,
}

impl EligibilityFilter {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Select candidates whose current funding rate is at or below
    /// `threshold` (threshold is negative, e.g. -0.01 for -1%), sorted most
    /// negative first and truncated to `top_n`.
    ///
    /// Candidates with no funding entry are skipped silently; inactive
    /// markets legitimately report none. An empty result is a normal
    /// outcome, not a failure.
    pub async fn select(
        &self,
        candidates: &[String],
        threshold: f64,
        top_n: usize,
    ) -> Result<Vec<(String, f64)>, GatewayError> {
        let quotes = self.gateway.get_funding_rates().await?;
        let by_symbol: HashMap<&str, f64> = quotes
            .iter()
            .map(|quote| (quote.symbol.as_str(), quote.rate))
            .collect();

        let mut eligible: Vec<(String, f64)> = Vec::new();
        for candidate in candidates {
            match by_symbol.get(candidate.as_str()) {
                Some(&rate) if rate <= threshold => {
                    info!(
                        "EligibilityFilter: {} qualifies with funding rate {:.4}%",
                        candidate,
                        rate * 100.0
                    );
                    eligible.push((candidate.clone(), rate));
                }
                Some(&rate) => {
                    debug!(
                        "EligibilityFilter: {} above threshold ({:.4}% > {:.4}%)",
                        candidate,
                        rate * 100.0,
                        threshold * 100.0
                    );
                }
                None => {
                    debug!("EligibilityFilter: no funding data for {}", candidate);
                }
            }
        }

        eligible.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        eligible.truncate(top_n);
        Ok(eligible)
    }
}
