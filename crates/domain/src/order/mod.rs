//! Orders produced by checkout.
//!
//! An order is an immutable record of what was bought and at what price;
//! after creation only its status and payment status move.

mod status;

pub use status::{OrderStatus, PaymentStatus};

use chrono::{DateTime, Utc};
use common::{Money, OrderId, Owner, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cart::ItemOptions;
use crate::entity::Entity;

/// Errors that can occur on order lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cannot move payment from {from} to {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Order has no items")]
    NoItems,
}

/// How the customer intends to pay. Collection happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    CashOnDelivery,
    Card,
    BankTransfer,
}

/// Customer contact details, denormalised onto the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CustomerInfo {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShippingAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// A purchased line. Everything is copied; nothing points back at the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub options: ItemOptions,
    pub unit_price: Money,
    pub quantity: u32,
    pub total: Money,
}

/// Money figures of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderTotals {
    pub sub_total: Money,
    pub discount_amount: Money,
    pub tax: Money,
    pub shipping_fee: Money,
    pub total_amount: Money,
}

/// Everything needed to place an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub owner: Owner,
    pub customer: CustomerInfo,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub note: Option<String>,
    pub items: Vec<OrderItem>,
    pub coupon_code: Option<String>,
    pub totals: OrderTotals,
    pub placed_at: DateTime<Utc>,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    owner: Owner,
    customer: CustomerInfo,
    shipping_address: ShippingAddress,
    payment_method: PaymentMethod,
    note: Option<String>,
    items: Vec<OrderItem>,
    coupon_code: Option<String>,
    totals: OrderTotals,
    status: OrderStatus,
    payment_status: PaymentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a `Pending` order with `Pending` payment.
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        Ok(Self {
            order_number: order_number(new.id, new.placed_at),
            id: new.id,
            owner: new.owner,
            customer: new.customer,
            shipping_address: new.shipping_address,
            payment_method: new.payment_method,
            note: new.note,
            items: new.items,
            coupon_code: new.coupon_code,
            totals: new.totals,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            created_at: new.placed_at,
            updated_at: new.placed_at,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Human-readable number, e.g. `ORD-20240131-1A2B3C4D`.
    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn customer(&self) -> &CustomerInfo {
        &self.customer
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code.as_deref()
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves the order along its state machine.
    pub fn transition_to(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the order. The caller returns the stock.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition_to(OrderStatus::Cancelled, now)
    }

    pub fn record_payment(&mut self, to: PaymentStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.payment_status.can_transition_to(to) {
            return Err(OrderError::InvalidPaymentTransition {
                from: self.payment_status,
                to,
            });
        }
        self.payment_status = to;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for Order {
    const KIND: &'static str = "order";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

/// `ORD-<yyyymmdd>-<first 8 hex digits of the id>`.
fn order_number(id: OrderId, placed_at: DateTime<Utc>) -> String {
    let hex = id.as_uuid().simple().to_string().to_uppercase();
    format!("ORD-{}-{}", placed_at.format("%Y%m%d"), &hex[..8])
}
