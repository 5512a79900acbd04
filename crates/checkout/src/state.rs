//! Checkout state machine.

/// The state of a checkout attempt.
///
/// State transitions:
/// ```text
/// Validating ──► ReservingStock ──► ApplyingCoupon ──► CreatingOrder ──► Completed
///      │               │                  │                  │
///      └───────────────┴──────────────────┴──────────────────┴──► Failed
/// ```
/// Entering `Failed` from any state after `Validating` runs compensation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CheckoutState {
    /// Checking cart lines against the catalog.
    #[default]
    Validating,

    /// Holding stock for each line.
    ReservingStock,

    /// Re-validating and consuming the coupon.
    ApplyingCoupon,

    /// Persisting the order and confirming reservations.
    CreatingOrder,

    /// Order placed (terminal state).
    Completed,

    /// Rolled back (terminal state). Carries the error kind.
    Failed { reason: &'static str },
}

impl CheckoutState {
    /// Returns true if `to` is a legal next state.
    pub fn can_transition_to(&self, to: &CheckoutState) -> bool {
        use CheckoutState::*;
        match (self, to) {
            (Validating, ReservingStock)
            | (ReservingStock, ApplyingCoupon)
            | (ApplyingCoupon, CreatingOrder)
            | (CreatingOrder, Completed) => true,
            (from, Failed { .. }) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Completed | CheckoutState::Failed { .. })
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Validating => "validating",
            CheckoutState::ReservingStock => "reserving_stock",
            CheckoutState::ApplyingCoupon => "applying_coupon",
            CheckoutState::CreatingOrder => "creating_order",
            CheckoutState::Completed => "completed",
            CheckoutState::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckoutState::Failed { reason } => write!(f, "failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}
