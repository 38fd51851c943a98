//! Sale progress.

use alloy::primitives::U256;

use crate::quote::scale_quantity;

/// How much of the initial supply has been sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleProgress {
    total: U256,
    available: U256,
}

impl SaleProgress {
    /// Progress for a sale that started with `initial_supply` whole tokens
    /// and has `available` (scaled to `token_decimals`) left.
    #[must_use]
    pub fn new(initial_supply: u64, available: U256, token_decimals: u8) -> Self {
        Self {
            total: scale_quantity(initial_supply, token_decimals),
            available,
        }
    }

    /// Initial supply, scaled.
    #[must_use]
    pub const fn total(&self) -> U256 {
        self.total
    }

    /// Tokens still for sale, scaled.
    #[must_use]
    pub const fn available(&self) -> U256 {
        self.available
    }

    /// Tokens sold so far, scaled.
    #[must_use]
    pub fn sold(&self) -> U256 {
        self.total.saturating_sub(self.available)
    }

    /// Sold share of the initial supply, in percent with two decimals.
    #[must_use]
    pub fn percent_sold(&self) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        let basis_points = self.sold().saturating_mul(U256::from(10_000u32)) / self.total;
        let basis_points = u32::try_from(basis_points).unwrap_or(10_000);
        f64::from(basis_points) / 100.0
    }

    /// The sale is closed once nothing is left.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.available.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::unit;

    #[test]
    fn sold_and_percent() {
        let progress = SaleProgress::new(1_000, unit(18) * U256::from(750), 18);
        assert_eq!(progress.sold(), unit(18) * U256::from(250));
        assert!((progress.percent_sold() - 25.0).abs() < f64::EPSILON);
        assert!(!progress.is_closed());
    }

    #[test]
    fn percent_has_hundredth_resolution() {
        let progress = SaleProgress::new(3, unit(18) * U256::from(2), 18);
        assert!((progress.percent_sold() - 33.33).abs() < 1e-9);
    }

    #[test]
    fn zero_supply_reports_nothing_sold() {
        let progress = SaleProgress::new(0, U256::from(5), 18);
        assert_eq!(progress.sold(), U256::ZERO);
        assert!(progress.percent_sold().abs() < f64::EPSILON);
    }

    #[test]
    fn closed_only_at_zero_inventory() {
        assert!(SaleProgress::new(10, U256::ZERO, 18).is_closed());
        assert!(!SaleProgress::new(10, U256::from(1), 18).is_closed());
    }
}
