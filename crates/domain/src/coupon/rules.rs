//! Eligibility, discount computation, consumption and reversal.

use chrono::{DateTime, Utc};
use common::{Money, Owner, UsageId};

use super::{Coupon, CouponAudience, CouponKind, CouponRejection, Discount};

impl Coupon {
    /// Runs the eligibility checks in order and reports the first failure.
    pub fn check_eligibility(
        &self,
        subtotal: Money,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if now < self.starts_at {
            return Err(CouponRejection::NotYetActive);
        }
        if now > self.ends_at {
            return Err(CouponRejection::Expired);
        }
        if let CouponAudience::Personal { user_id } = self.audience {
            if owner.user_id() != Some(user_id) {
                return Err(CouponRejection::WrongOwner);
            }
        }
        match self.kind {
            CouponKind::OneTime if self.is_used => return Err(CouponRejection::AlreadyUsed),
            CouponKind::Gradual if !self.remaining_balance.is_positive() => {
                return Err(CouponRejection::BalanceExhausted);
            }
            _ => {}
        }
        if let Some(max) = self.max_usage_count {
            if self.usage_count >= max {
                return Err(CouponRejection::UsageCapReached);
            }
        }
        if let Some(minimum) = self.min_order_amount {
            if subtotal < minimum {
                return Err(CouponRejection::BelowMinimumOrder { minimum });
            }
        }
        Ok(())
    }

    /// Discount this coupon gives on `subtotal`, ignoring eligibility.
    ///
    /// Never negative and never more than the subtotal.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let subtotal = subtotal.max(Money::zero());
        let mut amount = match self.discount {
            Discount::Percentage { basis_points } => {
                let raw = subtotal.percentage(basis_points);
                match self.max_discount_amount {
                    Some(cap) => raw.min(cap),
                    None => raw,
                }
            }
            Discount::FixedAmount { amount } => amount,
        };
        if self.kind == CouponKind::Gradual {
            amount = amount.min(self.remaining_balance);
        }
        amount.min(subtotal).max(Money::zero())
    }

    /// Eligibility check followed by the discount computation.
    pub fn evaluate(
        &self,
        subtotal: Money,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> Result<Money, CouponRejection> {
        self.check_eligibility(subtotal, owner, now)?;
        Ok(self.discount_for(subtotal))
    }

    /// Spends the coupon for `discount` under `usage`, re-checking
    /// eligibility first.
    ///
    /// Returns the balance left afterwards. Callers run this inside a
    /// version-conditioned update, so the check and the spend are atomic.
    /// Consuming again under a usage id already applied changes nothing.
    pub fn consume(
        &mut self,
        usage: UsageId,
        subtotal: Money,
        discount: Money,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> Result<Money, CouponRejection> {
        if self.redemptions.contains_key(&usage) {
            return Ok(self.remaining_balance);
        }
        self.check_eligibility(subtotal, owner, now)?;

        match self.kind {
            CouponKind::OneTime => self.is_used = true,
            CouponKind::Gradual => {
                if self.remaining_balance < discount {
                    return Err(CouponRejection::BalanceExhausted);
                }
                self.remaining_balance -= discount;
            }
        }
        self.usage_count += 1;
        self.redemptions.insert(usage, discount);
        Ok(self.remaining_balance)
    }

    /// Undoes the counter effects of the consumption under `usage`.
    ///
    /// Returns false, changing nothing, if no such consumption is applied.
    pub fn reverse(&mut self, usage: UsageId) -> bool {
        let Some(discount) = self.redemptions.remove(&usage) else {
            return false;
        };
        match self.kind {
            CouponKind::OneTime => self.is_used = false,
            CouponKind::Gradual => self.remaining_balance += discount,
        }
        self.usage_count = self.usage_count.saturating_sub(1);
        true
    }
}
