//! Catalog products and their stock counters.

use std::collections::BTreeMap;

use common::{HoldId, Money, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::Entity;

/// Lifecycle status of a product.
///
/// Checked explicitly wherever a product is read for selling; there is no
/// implicit soft-delete filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
    Deleted,
}

impl ProductStatus {
    /// Returns true if the product can be sold.
    pub fn is_sellable(&self) -> bool {
        matches!(self, ProductStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by stock mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("Quantity must be at least 1, got {quantity}")]
    InvalidQuantity { quantity: u32 },

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    Insufficient {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Product {product_id} is {status}")]
    Unavailable {
        product_id: ProductId,
        status: ProductStatus,
    },

    /// Confirming more than is reserved would break `reserved ≤ stock`.
    #[error("Cannot confirm {requested} of {product_id}: only {reserved} reserved")]
    NotReserved {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    #[error("Price for {product_id} is invalid")]
    InvalidPrice { product_id: ProductId },

    #[error("Product {product_id} has no hold {hold_id}")]
    UnknownHold {
        product_id: ProductId,
        hold_id: HoldId,
    },
}

/// What a release actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Units taken off `reserved_quantity`.
    pub released: u32,

    /// Units asked for beyond what was reserved. Non-zero means a caller
    /// tried to release something it never held.
    pub shortfall: u32,
}

/// A product as owned by the catalog, including its stock counters.
///
/// Invariant: `reserved_quantity ≤ stock_quantity`, so `available()` never
/// underflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    price: Money,
    discount_price: Option<Money>,
    stock_quantity: u32,
    reserved_quantity: u32,
    status: ProductStatus,
    /// Outstanding checkout holds, each counted in `reserved_quantity`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    holds: BTreeMap<HoldId, u32>,
}

impl Product {
    /// Creates an active product with no reservations.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock_quantity: u32,
    ) -> Result<Self, StockError> {
        let id = id.into();
        if price.is_negative() {
            return Err(StockError::InvalidPrice { product_id: id });
        }
        Ok(Self {
            id,
            name: name.into(),
            price,
            discount_price: None,
            stock_quantity,
            reserved_quantity: 0,
            status: ProductStatus::Active,
            holds: BTreeMap::new(),
        })
    }

    /// Sets a sale price. It must not be negative or above the list price.
    pub fn with_discount_price(mut self, discount_price: Money) -> Result<Self, StockError> {
        if discount_price.is_negative() || discount_price > self.price {
            return Err(StockError::InvalidPrice {
                product_id: self.id,
            });
        }
        self.discount_price = Some(discount_price);
        Ok(self)
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    pub fn id(&self) -> &ProductId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn discount_price(&self) -> Option<Money> {
        self.discount_price
    }

    /// The price a customer pays right now.
    pub fn effective_price(&self) -> Money {
        self.discount_price.unwrap_or(self.price)
    }

    pub fn stock_quantity(&self) -> u32 {
        self.stock_quantity
    }

    pub fn reserved_quantity(&self) -> u32 {
        self.reserved_quantity
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> u32 {
        self.stock_quantity.saturating_sub(self.reserved_quantity)
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Changes the list and sale price together.
    pub fn set_price(
        &mut self,
        price: Money,
        discount_price: Option<Money>,
    ) -> Result<(), StockError> {
        if price.is_negative() || discount_price.is_some_and(|d| d.is_negative() || d > price) {
            return Err(StockError::InvalidPrice {
                product_id: self.id.clone(),
            });
        }
        self.price = price;
        self.discount_price = discount_price;
        Ok(())
    }

    pub fn set_status(&mut self, status: ProductStatus) {
        self.status = status;
    }

    /// Holds `quantity` units for an in-flight checkout.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), StockError> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity { quantity });
        }
        if !self.status.is_sellable() {
            return Err(StockError::Unavailable {
                product_id: self.id.clone(),
                status: self.status,
            });
        }
        let available = self.available();
        if available < quantity {
            return Err(StockError::Insufficient {
                product_id: self.id.clone(),
                requested: quantity,
                available,
            });
        }
        self.reserved_quantity += quantity;
        Ok(())
    }

    /// Gives back held units, flooring the reserved count at zero.
    pub fn release(&mut self, quantity: u32) -> Release {
        let released = quantity.min(self.reserved_quantity);
        self.reserved_quantity -= released;
        Release {
            released,
            shortfall: quantity - released,
        }
    }

    /// Turns held units into a sale: both counters go down.
    pub fn confirm(&mut self, quantity: u32) -> Result<(), StockError> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity { quantity });
        }
        if self.reserved_quantity < quantity {
            return Err(StockError::NotReserved {
                product_id: self.id.clone(),
                requested: quantity,
                reserved: self.reserved_quantity,
            });
        }
        self.reserved_quantity -= quantity;
        self.stock_quantity -= quantity;
        Ok(())
    }

    /// Reserves `quantity` units under `hold`.
    ///
    /// Applying the same hold twice is a no-op, so a write whose outcome
    /// was never observed can be retried or undone by id.
    pub fn reserve_hold(&mut self, hold: HoldId, quantity: u32) -> Result<(), StockError> {
        if self.holds.contains_key(&hold) {
            return Ok(());
        }
        self.reserve(quantity)?;
        self.holds.insert(hold, quantity);
        Ok(())
    }

    /// Releases whatever `hold` still has reserved. Unknown holds change nothing.
    pub fn release_hold(&mut self, hold: HoldId) -> Option<Release> {
        let quantity = self.holds.remove(&hold)?;
        Some(self.release(quantity))
    }

    /// Turns the units held under `hold` into a sale and returns how many.
    pub fn confirm_hold(&mut self, hold: HoldId) -> Result<u32, StockError> {
        let Some(&quantity) = self.holds.get(&hold) else {
            return Err(StockError::UnknownHold {
                product_id: self.id.clone(),
                hold_id: hold,
            });
        };
        self.confirm(quantity)?;
        self.holds.remove(&hold);
        Ok(quantity)
    }

    pub fn is_holding(&self, hold: HoldId) -> bool {
        self.holds.contains_key(&hold)
    }

    /// Puts sold units back on the shelf (inverse of `confirm`).
    pub fn restock(&mut self, quantity: u32) {
        self.stock_quantity = self.stock_quantity.saturating_add(quantity);
    }

    /// Read-model view of this product.
    pub fn snapshot(&self) -> ProductSnapshot {
        ProductSnapshot {
            product_id: self.id.clone(),
            name: self.name.clone(),
            price: self.price,
            discount_price: self.discount_price,
            available_quantity: self.available(),
            is_active: self.status.is_sellable(),
        }
    }
}

impl Entity for Product {
    const KIND: &'static str = "product";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

/// What the storefront needs to know about a product at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    pub discount_price: Option<Money>,
    pub available_quantity: u32,
    pub is_active: bool,
}

impl ProductSnapshot {
    pub fn effective_price(&self) -> Money {
        self.discount_price.unwrap_or(self.price)
    }
}
