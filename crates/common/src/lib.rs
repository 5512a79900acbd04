//! Shared types for the storefront checkout core.

pub mod identity;
pub mod money;
pub mod types;

pub use identity::Owner;
pub use money::Money;
pub use types::{
    CartId, CartItemId, CouponId, HoldId, OrderId, ProductId, SessionToken, UsageId, UserId,
};
