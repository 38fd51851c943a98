//! Cost quoting and approval decisions.
//!
//! Every function here is pure and total: an input that cannot produce a
//! meaningful answer yields `None` (or `false`) instead of an error, and the
//! caller turns that into a disabled action.

use alloy::primitives::U256;
use alloy::primitives::utils::format_units;

/// `10^decimals` as a [`U256`].
#[must_use]
pub fn unit(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Scale a whole-token quantity to its fixed-point representation.
#[must_use]
pub fn scale_quantity(quantity: u64, decimals: u8) -> U256 {
    U256::from(quantity).saturating_mul(unit(decimals))
}

/// Total stablecoin cost of `quantity` whole tokens at `unit_price`.
///
/// Uses the sale contract's own arithmetic,
/// `cost = quantity_scaled * price / one_token`, with floor division.
/// Returns `None` when the price is absent or zero, the quantity is zero,
/// or the cost floors to zero.
#[must_use]
pub fn compute_total_cost(
    quantity: u64,
    unit_price: Option<U256>,
    token_decimals: u8,
) -> Option<U256> {
    let price = unit_price.filter(|p| !p.is_zero())?;
    if quantity == 0 {
        return None;
    }

    let one = unit(token_decimals);
    let cost = scale_quantity(quantity, token_decimals).checked_mul(price)? / one;
    (!cost.is_zero()).then_some(cost)
}

/// Whether an approval must precede the purchase.
///
/// False while either side is unknown: there is nothing to approve yet.
#[must_use]
pub fn needs_approval(allowance: Option<U256>, total_cost: Option<U256>) -> bool {
    matches!((allowance, total_cost), (Some(allowance), Some(cost)) if allowance < cost)
}

/// Whether the current allowance must be reset to zero before a new
/// approval.
///
/// Some stablecoins (USDT among them) reject a nonzero → nonzero allowance
/// change, so any nonzero allowance is reset first.
#[must_use]
pub fn needs_allowance_reset(current_allowance: U256) -> bool {
    !current_allowance.is_zero()
}

/// Cap a quantity at `max`.
#[must_use]
pub fn clamp_quantity(quantity: u64, max: u64) -> u64 {
    quantity.min(max)
}

/// Parse free-text quantity input.
///
/// Thousands separators are ignored, unparseable text counts as zero, and
/// the result is clamped to `[1, max]`.
#[must_use]
pub fn parse_quantity_input(raw: &str, max: u64) -> u64 {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    let parsed = cleaned.parse::<u64>().unwrap_or(0);
    parsed.clamp(1, max.max(1))
}

/// Render a fixed-point amount as a decimal string.
#[must_use]
pub fn format_amount(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}
