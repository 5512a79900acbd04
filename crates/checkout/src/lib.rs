//! Cart-to-order checkout for the storefront.
//!
//! This crate holds the services around the domain entities:
//! - `CatalogReadModel`: price and availability snapshots of products
//! - `StockReservationManager`: atomic reserve / release / confirm of stock
//! - `CouponEvaluator`: coupon previews, consumption and reversal
//! - `CartService`: owner-scoped cart mutations and session merge
//! - `CheckoutOrchestrator`: the checkout saga with compensation
//! - `OrderService`: order lookup and lifecycle after checkout
//!
//! A checkout either produces exactly one order with stock and coupon
//! committed, or leaves stock, coupons and orders as they were.

pub mod attempt;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod coupons;
pub mod error;
pub mod orchestrator;
pub mod orders;
pub mod reservation;
pub mod state;

pub use attempt::{CheckoutAttempt, CompensationGuard, Compensator, HoldStatus};
pub use cart::CartService;
pub use catalog::CatalogReadModel;
pub use config::{CheckoutConfig, ShippingPolicy};
pub use coupons::{ConsumeRequest, CouponEvaluator, ValidationResult};
pub use error::{CheckoutError, Result, StockShortfall};
pub use orchestrator::{CheckoutDetails, CheckoutOrchestrator};
pub use orders::OrderService;
pub use reservation::{Reservation, StockReservationManager};
pub use state::CheckoutState;
