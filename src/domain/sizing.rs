use rust_decimal::Decimal;
use tracing::warn;

/// Quantize `qty` down to a whole number of lot steps.
///
/// The result's decimal scale is derived from the step itself (step 0.01
/// implies two decimals in the order payload), so `to_string()` on the
/// returned value is wire-ready.
pub fn quantize_to_step(qty: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        warn!("quantize_to_step: non-positive step {}, passing through", step);
        return qty;
    }
    let steps = (qty / step).floor();
    (steps * step).round_dp(step.normalize().scale())
}
