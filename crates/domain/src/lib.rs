//! Domain layer for the storefront checkout core.
//!
//! This crate provides:
//! - Product, Coupon, CouponUsage, Cart and Order entities with their rules
//! - The Entity trait mapping each of them to a versioned record
//! - Repository, which runs read-modify-write cycles as conditional updates

pub mod cart;
pub mod coupon;
pub mod entity;
pub mod error;
pub mod order;
pub mod product;
pub mod repository;

pub use cart::{AppliedCoupon, Cart, CartError, CartItem, CartTotals, ItemOptions};
pub use coupon::{
    Coupon, CouponAudience, CouponKind, CouponRejection, CouponUsage, Discount, normalize_code,
};
pub use entity::Entity;
pub use error::{MutationError, RepositoryError};
pub use order::{
    CustomerInfo, NewOrder, Order, OrderError, OrderItem, OrderStatus, OrderTotals,
    PaymentMethod, PaymentStatus, ShippingAddress,
};
pub use product::{Product, ProductSnapshot, ProductStatus, Release, StockError};
pub use repository::{Mutation, Repository, Versioned};
