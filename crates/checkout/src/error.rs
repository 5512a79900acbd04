//! Checkout error taxonomy.

use common::ProductId;
use domain::{CartError, CouponRejection, MutationError, OrderError, RepositoryError, StockError};
use serde::Serialize;
use thiserror::Error;

/// A product that could not be reserved in the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockShortfall {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

/// Errors surfaced by the checkout core.
///
/// Business failures are values of this type; none of them panic. A failed
/// checkout leaves carts, products and coupons as if it never ran.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed input.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The product is inactive, deleted or gone.
    #[error("Product unavailable: {product_id}")]
    ProductUnavailable { product_id: ProductId },

    #[error("Insufficient stock for {}", list_products(.shortfalls))]
    InsufficientStock { shortfalls: Vec<StockShortfall> },

    /// Rejected while previewing a coupon.
    #[error("Coupon not applicable: {0}")]
    CouponIneligible(CouponRejection),

    /// The cart's coupon stopped being valid between preview and checkout.
    #[error("Coupon no longer valid: {0}")]
    CouponNoLongerValid(CouponRejection),

    /// Retry budget exhausted on a contended record.
    #[error("Too much contention on {entity} {id}, try again")]
    Conflict { entity: &'static str, id: String },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The checkout ran out of time and was rolled back.
    #[error("Checkout cancelled")]
    Cancelled,

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl CheckoutError {
    /// Stable machine-readable kind, used in API bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutError::Validation(_) => "validation",
            CheckoutError::NotFound { .. } => "not_found",
            CheckoutError::ProductUnavailable { .. } => "product_unavailable",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::CouponIneligible(_) => "coupon_ineligible",
            CheckoutError::CouponNoLongerValid(_) => "coupon_no_longer_valid",
            CheckoutError::Conflict { .. } => "conflict",
            CheckoutError::PersistenceFailure(_) => "persistence_failure",
            CheckoutError::Cancelled => "cancelled",
            CheckoutError::Order(_) => "invalid_transition",
        }
    }

    /// Returns true for faults of the system rather than of the request.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            CheckoutError::PersistenceFailure(_) | CheckoutError::Cancelled
        )
    }
}

fn list_products(shortfalls: &[StockShortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| s.product_id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<RepositoryError> for CheckoutError {
    fn from(e: RepositoryError) -> Self {
        CheckoutError::PersistenceFailure(e.to_string())
    }
}

impl From<StockError> for CheckoutError {
    fn from(e: StockError) -> Self {
        match e {
            StockError::InvalidQuantity { quantity } => {
                CheckoutError::Validation(format!("quantity must be at least 1, got {quantity}"))
            }
            StockError::Insufficient {
                product_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                shortfalls: vec![StockShortfall {
                    product_id,
                    requested,
                    available,
                }],
            },
            StockError::Unavailable { product_id, .. } => {
                CheckoutError::ProductUnavailable { product_id }
            }
            e @ (StockError::NotReserved { .. } | StockError::UnknownHold { .. }) => {
                CheckoutError::PersistenceFailure(e.to_string())
            }
            e @ StockError::InvalidPrice { .. } => CheckoutError::Validation(e.to_string()),
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::InvalidQuantity { .. } => CheckoutError::Validation(e.to_string()),
            CartError::ItemNotFound { item_id } => CheckoutError::NotFound {
                entity: "cart item",
                id: item_id.to_string(),
            },
        }
    }
}

impl<E> From<MutationError<E>> for CheckoutError
where
    E: Into<CheckoutError>,
{
    fn from(e: MutationError<E>) -> Self {
        match e {
            MutationError::Rejected(e) => e.into(),
            MutationError::NotFound { kind, id } => CheckoutError::NotFound { entity: kind, id },
            MutationError::Exhausted { kind, id, .. } => {
                CheckoutError::Conflict { entity: kind, id }
            }
            MutationError::Repository(e) => e.into(),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_names_products() {
        let err = CheckoutError::InsufficientStock {
            shortfalls: vec![
                StockShortfall {
                    product_id: ProductId::new("ESP"),
                    requested: 3,
                    available: 1,
                },
                StockShortfall {
                    product_id: ProductId::new("LAT"),
                    requested: 1,
                    available: 0,
                },
            ],
        };
        assert_eq!(err.to_string(), "Insufficient stock for ESP, LAT");
        assert_eq!(err.kind(), "insufficient_stock");
    }

    #[test]
    fn test_exhausted_mutation_is_conflict() {
        let err: CheckoutError = MutationError::<StockError>::Exhausted {
            kind: "product",
            id: "ESP".to_string(),
            attempts: 17,
        }
        .into();
        assert!(matches!(err, CheckoutError::Conflict { entity: "product", .. }));
    }

    #[test]
    fn test_stock_rejection_maps_to_taxonomy() {
        let err: CheckoutError = MutationError::Rejected(StockError::Unavailable {
            product_id: ProductId::new("ESP"),
            status: domain::ProductStatus::Inactive,
        })
        .into();
        assert_eq!(err.kind(), "product_unavailable");
    }
}
