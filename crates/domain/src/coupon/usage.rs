use chrono::{DateTime, Utc};
use common::{CouponId, Money, OrderId, Owner, UsageId};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// One row of the append-only coupon ledger.
///
/// Written once per successful consumption, under the usage id the coupon
/// itself recorded. Only checkout compensation removes a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub id: UsageId,
    pub coupon_id: CouponId,
    pub coupon_code: String,
    pub order_id: OrderId,
    pub owner: Owner,
    /// Subtotal the discount was computed from.
    pub original_amount: Money,
    pub discount_amount: Money,
    pub final_amount: Money,
    /// Coupon balance right after this usage (zero for one-time coupons).
    pub remaining_balance: Money,
    pub used_at: DateTime<Utc>,
}

impl Entity for CouponUsage {
    const KIND: &'static str = "coupon_usage";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}
