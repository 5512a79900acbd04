//! HTTP handlers and shared application state.

pub mod cart;
pub mod coupons;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod products;

use checkout::{
    CartService, CatalogReadModel, CheckoutConfig, CheckoutOrchestrator, CouponEvaluator,
    OrderService,
};
use store::RecordStore;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: RecordStore + Clone + 'static> {
    pub catalog: CatalogReadModel<S>,
    pub carts: CartService<S>,
    pub checkout: CheckoutOrchestrator<S>,
    pub coupons: CouponEvaluator<S>,
    pub orders: OrderService<S>,
}

impl<S: RecordStore + Clone + 'static> AppState<S> {
    pub fn new(store: S, config: CheckoutConfig) -> Self {
        let retries = config.max_conflict_retries;
        Self {
            catalog: CatalogReadModel::new(store.clone()),
            carts: CartService::new(store.clone(), config.clone()),
            checkout: CheckoutOrchestrator::new(store.clone(), config),
            coupons: CouponEvaluator::new(store.clone(), retries),
            orders: OrderService::new(store, retries),
        }
    }
}

/// Parses a UUID-backed identifier from a path segment.
pub(crate) fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what} id: {e}")))
}
