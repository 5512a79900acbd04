//! Coupons and the usage ledger.
//!
//! A coupon is previewed against a cart any number of times but only
//! consumed at checkout. Consumption and its reversal are methods on the
//! coupon so the caller can run them inside a single conditional update.

mod rules;
mod usage;

pub use usage::CouponUsage;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{CouponId, Money, UsageId, UserId};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// How a coupon is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    /// Spent in full by the first order that uses it.
    OneTime,
    /// Carries a balance that successive orders draw down.
    Gradual,
}

/// Discount rule of a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discount {
    /// Fraction of the subtotal, in basis points (`1_000` is 10%).
    Percentage { basis_points: u32 },
    FixedAmount { amount: Money },
}

/// Who may redeem a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponAudience {
    /// Anyone, including anonymous sessions.
    System,
    /// Only the given user.
    Personal { user_id: UserId },
}

/// Why a coupon cannot be applied.
///
/// Variants are listed in the order the checks run; the first failing check
/// is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("Coupon not found")]
    NotFound,

    #[error("Coupon is not active")]
    Inactive,

    #[error("Coupon is not yet valid")]
    NotYetActive,

    #[error("Coupon has expired")]
    Expired,

    #[error("Coupon belongs to another customer")]
    WrongOwner,

    #[error("Coupon has already been used")]
    AlreadyUsed,

    #[error("Coupon balance is exhausted")]
    BalanceExhausted,

    #[error("Coupon usage limit reached")]
    UsageCapReached,

    #[error("Order subtotal is below the coupon minimum of {minimum}")]
    BelowMinimumOrder { minimum: Money },
}

impl CouponRejection {
    /// Stable machine-readable reason code.
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "not_found",
            CouponRejection::Inactive => "inactive",
            CouponRejection::NotYetActive => "not_yet_active",
            CouponRejection::Expired => "expired",
            CouponRejection::WrongOwner => "wrong_owner",
            CouponRejection::AlreadyUsed => "already_used",
            CouponRejection::BalanceExhausted => "balance_exhausted",
            CouponRejection::UsageCapReached => "usage_cap_reached",
            CouponRejection::BelowMinimumOrder { .. } => "below_minimum_order",
        }
    }
}

/// A discount coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    id: CouponId,
    code: String,
    kind: CouponKind,
    discount: Discount,
    max_discount_amount: Option<Money>,
    min_order_amount: Option<Money>,
    /// Meaningful for `Gradual` coupons only; zero otherwise.
    remaining_balance: Money,
    audience: CouponAudience,
    is_active: bool,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    max_usage_count: Option<u32>,
    usage_count: u32,
    is_used: bool,
    /// Discount granted per usage id, written in the same update as the
    /// counters. Reversal is keyed on it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    redemptions: BTreeMap<UsageId, Money>,
}

impl Coupon {
    /// Creates an active, system-wide one-time coupon valid within the window.
    pub fn one_time(
        code: &str,
        discount: Discount,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self::build(code, CouponKind::OneTime, discount, Money::zero(), starts_at, ends_at)
    }

    /// Creates an active, system-wide gradual coupon holding `balance`.
    pub fn gradual(
        code: &str,
        balance: Money,
        discount: Discount,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self::build(code, CouponKind::Gradual, discount, balance, starts_at, ends_at)
    }

    fn build(
        code: &str,
        kind: CouponKind,
        discount: Discount,
        remaining_balance: Money,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CouponId::new(),
            code: normalize_code(code),
            kind,
            discount,
            max_discount_amount: None,
            min_order_amount: None,
            remaining_balance: remaining_balance.max(Money::zero()),
            audience: CouponAudience::System,
            is_active: true,
            starts_at,
            ends_at,
            max_usage_count: None,
            usage_count: 0,
            is_used: false,
            redemptions: BTreeMap::new(),
        }
    }

    /// Caps the discount a percentage coupon can give.
    pub fn with_max_discount(mut self, max: Money) -> Self {
        self.max_discount_amount = Some(max);
        self
    }

    pub fn with_min_order(mut self, min: Money) -> Self {
        self.min_order_amount = Some(min);
        self
    }

    pub fn with_max_usage(mut self, max: u32) -> Self {
        self.max_usage_count = Some(max);
        self
    }

    /// Restricts the coupon to one user.
    pub fn personal_to(mut self, user_id: UserId) -> Self {
        self.audience = CouponAudience::Personal { user_id };
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn id(&self) -> CouponId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn kind(&self) -> CouponKind {
        self.kind
    }

    pub fn discount(&self) -> Discount {
        self.discount
    }

    pub fn max_discount_amount(&self) -> Option<Money> {
        self.max_discount_amount
    }

    pub fn min_order_amount(&self) -> Option<Money> {
        self.min_order_amount
    }

    pub fn remaining_balance(&self) -> Money {
        self.remaining_balance
    }

    pub fn audience(&self) -> CouponAudience {
        self.audience
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    pub fn max_usage_count(&self) -> Option<u32> {
        self.max_usage_count
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count
    }

    pub fn is_used(&self) -> bool {
        self.is_used
    }

    /// Whether a consumption under `usage` is applied to the counters.
    pub fn is_redeemed(&self, usage: UsageId) -> bool {
        self.redemptions.contains_key(&usage)
    }

    pub fn set_active(&mut self, is_active: bool) {
        self.is_active = is_active;
    }
}

impl Entity for Coupon {
    const KIND: &'static str = "coupon";

    fn entity_id(&self) -> String {
        self.code.clone()
    }
}

/// Canonical form of a coupon code: trimmed and upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
