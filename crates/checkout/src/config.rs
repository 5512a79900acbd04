//! Checkout policy knobs.

use std::time::Duration;

use common::Money;

/// Shipping fee rule: a flat fee, waived at or above a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShippingPolicy {
    pub flat_fee: Money,
    pub free_shipping_threshold: Option<Money>,
}

impl ShippingPolicy {
    /// Fee for a cart with the given subtotal. An empty cart ships free.
    pub fn fee_for(&self, subtotal: Money) -> Money {
        if !subtotal.is_positive() {
            return Money::zero();
        }
        match self.free_shipping_threshold {
            Some(threshold) if subtotal >= threshold => Money::zero(),
            _ => self.flat_fee,
        }
    }
}

/// Configuration shared by the cart service and the checkout orchestrator.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Largest drift between a cart's price snapshot and the live price that
    /// checkout tolerates without re-snapshotting the line.
    pub price_tolerance: Money,

    /// Retries after a version conflict before giving up with `Conflict`.
    pub max_conflict_retries: u32,

    pub shipping: ShippingPolicy,

    /// Tax rate in basis points, applied to `sub_total - discount`.
    pub tax_rate_bps: u32,

    /// Lifetime of an idle anonymous cart.
    pub anonymous_cart_ttl: chrono::Duration,

    /// Budget for a whole checkout; exceeding it cancels and compensates.
    pub checkout_timeout: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            price_tolerance: Money::zero(),
            max_conflict_retries: 16,
            shipping: ShippingPolicy::default(),
            tax_rate_bps: 0,
            anonymous_cart_ttl: chrono::Duration::hours(168),
            checkout_timeout: Duration::from_millis(10_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CheckoutConfig::default();
        assert_eq!(config.price_tolerance, Money::zero());
        assert_eq!(config.max_conflict_retries, 16);
        assert_eq!(config.tax_rate_bps, 0);
        assert_eq!(config.anonymous_cart_ttl, chrono::Duration::days(7));
    }

    #[test]
    fn test_flat_fee_and_threshold() {
        let policy = ShippingPolicy {
            flat_fee: Money::from_cents(500),
            free_shipping_threshold: Some(Money::from_cents(5000)),
        };
        assert_eq!(policy.fee_for(Money::from_cents(4999)), Money::from_cents(500));
        assert_eq!(policy.fee_for(Money::from_cents(5000)), Money::zero());
        assert_eq!(policy.fee_for(Money::zero()), Money::zero());
    }

    #[test]
    fn test_no_threshold_always_charges() {
        let policy = ShippingPolicy {
            flat_fee: Money::from_cents(300),
            free_shipping_threshold: None,
        };
        assert_eq!(policy.fee_for(Money::from_cents(100_000)), Money::from_cents(300));
    }
}
