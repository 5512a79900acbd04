//! Cart aggregate.
//!
//! The cart owns its items by value and references products only by id.
//! Prices are snapshotted when an item is added; later catalog changes do
//! not move them until checkout re-validates.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::{CartId, CartItemId, CouponId, Money, Owner, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::Entity;
use crate::product::ProductSnapshot;

/// Errors raised by cart mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Quantity must be at least 1, got {quantity}")]
    InvalidQuantity { quantity: u32 },

    #[error("Cart item not found: {item_id}")]
    ItemNotFound { item_id: CartItemId },
}

/// Free-form line options (size, grind, milk, ...).
///
/// Kept sorted so two lines with the same options compare equal regardless
/// of the order they were supplied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemOptions(BTreeMap<String, String>);

impl ItemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, String>> for ItemOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    /// List price at the time the line was added.
    pub unit_price: Money,
    /// Sale price at the time the line was added, if any.
    pub discount_price: Option<Money>,
    pub options: ItemOptions,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    /// Price per unit the customer pays.
    pub fn effective_unit_price(&self) -> Money {
        self.discount_price.unwrap_or(self.unit_price)
    }

    /// Line total.
    pub fn total_price(&self) -> Money {
        self.effective_unit_price().multiply(self.quantity)
    }

    fn same_line(&self, product_id: &ProductId, options: &ItemOptions) -> bool {
        &self.product_id == product_id && &self.options == options
    }
}

/// Coupon previewed against the cart. Not consumed until checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon_id: CouponId,
    pub code: String,
    /// Discount as of the last preview.
    pub discount: Money,
}

/// Derived money figures of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub shipping_fee: Money,
    pub grand_total: Money,
    pub item_count: u32,
}

/// A shopping cart owned by exactly one user or anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    id: CartId,
    owner: Owner,
    items: Vec<CartItem>,
    coupon: Option<AppliedCoupon>,
    discount_amount: Money,
    shipping_fee: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// Creates an empty cart. Anonymous carts get an expiry `ttl` from now.
    pub fn new(owner: Owner, now: DateTime<Utc>, ttl: Duration) -> Self {
        let expires_at = owner.is_anonymous().then(|| now + ttl);
        Self {
            id: CartId::new(),
            owner,
            items: Vec::new(),
            coupon: None,
            discount_amount: Money::zero(),
            shipping_fee: Money::zero(),
            created_at: now,
            updated_at: now,
            expires_at,
        }
    }

    pub fn id(&self) -> CartId {
        self.id
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item(&self, item_id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn coupon(&self) -> Option<&AppliedCoupon> {
        self.coupon.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True for anonymous carts past their expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Records activity, pushing an anonymous cart's expiry out again.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        if self.owner.is_anonymous() {
            self.expires_at = Some(now + ttl);
        }
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::total_price).sum()
    }

    /// Current derived totals.
    pub fn totals(&self) -> CartTotals {
        let subtotal = self.subtotal();
        let grand_total = (subtotal - self.discount_amount + self.shipping_fee).max(Money::zero());
        CartTotals {
            subtotal,
            discount_amount: self.discount_amount,
            shipping_fee: self.shipping_fee,
            grand_total,
            item_count: self.items.iter().map(|i| i.quantity).sum(),
        }
    }

    /// Adds `quantity` of a product, merging into an existing line with the
    /// same options. A merged line keeps its original price snapshot.
    pub fn add_item(
        &mut self,
        product: &ProductSnapshot,
        quantity: u32,
        options: ItemOptions,
        now: DateTime<Utc>,
    ) -> Result<CartItemId, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.same_line(&product.product_id, &options))
        {
            existing.quantity = existing.quantity.saturating_add(quantity);
            let id = existing.id;
            self.recalculate();
            return Ok(id);
        }

        let item = CartItem {
            id: CartItemId::new(),
            product_id: product.product_id.clone(),
            product_name: product.name.clone(),
            quantity,
            unit_price: product.price,
            discount_price: product.discount_price,
            options,
            added_at: now,
        };
        let id = item.id;
        self.items.push(item);
        self.recalculate();
        Ok(id)
    }

    /// Sets a line's quantity. Zero is rejected; use `remove_item`.
    pub fn update_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity { quantity });
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(CartError::ItemNotFound { item_id })?;
        item.quantity = quantity;
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: CartItemId) -> Result<CartItem, CartError> {
        let index = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(CartError::ItemNotFound { item_id })?;
        let removed = self.items.remove(index);
        self.recalculate();
        Ok(removed)
    }

    /// Re-snapshots a line's prices from the catalog.
    ///
    /// Returns true if anything changed.
    pub fn refresh_item_price(&mut self, item_id: CartItemId, product: &ProductSnapshot) -> bool {
        let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) else {
            return false;
        };
        let changed = item.unit_price != product.price
            || item.discount_price != product.discount_price
            || item.product_name != product.name;
        item.unit_price = product.price;
        item.discount_price = product.discount_price;
        item.product_name = product.name.clone();
        if changed {
            self.recalculate();
        }
        changed
    }

    /// Removes every item and the coupon.
    pub fn clear(&mut self) {
        self.items.clear();
        self.coupon = None;
        self.recalculate();
    }

    /// Attaches a previewed coupon, replacing any previous one.
    pub fn apply_coupon(&mut self, coupon: AppliedCoupon) {
        self.coupon = Some(coupon);
        self.recalculate();
    }

    pub fn remove_coupon(&mut self) -> Option<AppliedCoupon> {
        let removed = self.coupon.take();
        self.recalculate();
        removed
    }

    pub fn set_shipping_fee(&mut self, fee: Money) {
        self.shipping_fee = fee.max(Money::zero());
    }

    /// Folds another cart's lines into this one by (product, options).
    ///
    /// Quantities of matching lines are added; this cart keeps its own
    /// coupon, or adopts the other's when it has none.
    pub fn absorb(&mut self, other: &Cart) {
        for incoming in &other.items {
            match self
                .items
                .iter_mut()
                .find(|i| i.same_line(&incoming.product_id, &incoming.options))
            {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(incoming.quantity);
                }
                None => self.items.push(incoming.clone()),
            }
        }
        if self.coupon.is_none() {
            self.coupon = other.coupon.clone();
        }
        self.recalculate();
    }

    /// Recomputes the discount so it never exceeds the subtotal.
    fn recalculate(&mut self) {
        let subtotal = self.subtotal();
        self.discount_amount = match &self.coupon {
            Some(coupon) => coupon.discount.min(subtotal).max(Money::zero()),
            None => Money::zero(),
        };
    }
}

impl Entity for Cart {
    const KIND: &'static str = "cart";

    /// Carts are keyed by owner: one live cart per user or session.
    fn entity_id(&self) -> String {
        self.owner.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SessionToken, UserId};

    fn snapshot(id: &str, cents: i64) -> ProductSnapshot {
        ProductSnapshot {
            product_id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Money::from_cents(cents),
            discount_price: None,
            available_quantity: 100,
            is_active: true,
        }
    }

    fn user_cart() -> Cart {
        Cart::new(Owner::User(UserId::new()), Utc::now(), Duration::hours(1))
    }

    fn applied(cents: i64) -> AppliedCoupon {
        AppliedCoupon {
            coupon_id: CouponId::new(),
            code: "SAVE".to_string(),
            discount: Money::from_cents(cents),
        }
    }

    #[test]
    fn test_add_item_snapshots_price() {
        let mut cart = user_cart();
        let mut product = snapshot("ESP", 1000);
        product.discount_price = Some(Money::from_cents(900));

        let id = cart
            .add_item(&product, 2, ItemOptions::new(), Utc::now())
            .unwrap();
        let item = cart.item(id).unwrap();
        assert_eq!(item.unit_price, Money::from_cents(1000));
        assert_eq!(item.total_price(), Money::from_cents(1800));
        assert_eq!(cart.totals().subtotal, Money::from_cents(1800));
    }

    #[test]
    fn test_same_product_and_options_merge() {
        let mut cart = user_cart();
        let product = snapshot("ESP", 1000);
        let fine = ItemOptions::new().with("grind", "fine");

        let first = cart.add_item(&product, 1, fine.clone(), Utc::now()).unwrap();
        let second = cart.add_item(&product, 2, fine, Utc::now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);

        let coarse = ItemOptions::new().with("grind", "coarse");
        cart.add_item(&product, 1, coarse, Utc::now()).unwrap();
        assert_eq!(cart.items().len(), 2);
    }

    #[test]
    fn test_merged_line_keeps_original_snapshot() {
        let mut cart = user_cart();
        cart.add_item(&snapshot("ESP", 1000), 1, ItemOptions::new(), Utc::now())
            .unwrap();
        cart.add_item(&snapshot("ESP", 1500), 1, ItemOptions::new(), Utc::now())
            .unwrap();
        assert_eq!(cart.items()[0].unit_price, Money::from_cents(1000));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut cart = user_cart();
        let result = cart.add_item(&snapshot("ESP", 1000), 0, ItemOptions::new(), Utc::now());
        assert_eq!(result, Err(CartError::InvalidQuantity { quantity: 0 }));

        let id = cart
            .add_item(&snapshot("ESP", 1000), 1, ItemOptions::new(), Utc::now())
            .unwrap();
        assert_eq!(
            cart.update_item_quantity(id, 0),
            Err(CartError::InvalidQuantity { quantity: 0 })
        );
        assert_eq!(cart.items()[0].quantity, 1);
    }

    #[test]
    fn test_unknown_item() {
        let mut cart = user_cart();
        let missing = CartItemId::new();
        assert_eq!(
            cart.remove_item(missing),
            Err(CartError::ItemNotFound { item_id: missing })
        );
    }

    #[test]
    fn test_discount_clamped_to_subtotal() {
        let mut cart = user_cart();
        let id = cart
            .add_item(&snapshot("ESP", 1000), 2, ItemOptions::new(), Utc::now())
            .unwrap();
        cart.apply_coupon(applied(1500));
        assert_eq!(cart.totals().discount_amount, Money::from_cents(1500));

        cart.update_item_quantity(id, 1).unwrap();
        let totals = cart.totals();
        assert_eq!(totals.discount_amount, Money::from_cents(1000));
        assert_eq!(totals.grand_total, Money::zero());
    }

    #[test]
    fn test_grand_total_includes_shipping() {
        let mut cart = user_cart();
        cart.add_item(&snapshot("ESP", 1000), 2, ItemOptions::new(), Utc::now())
            .unwrap();
        cart.apply_coupon(applied(500));
        cart.set_shipping_fee(Money::from_cents(300));

        let totals = cart.totals();
        assert_eq!(totals.grand_total, Money::from_cents(1800));
        assert_eq!(totals.item_count, 2);
    }

    #[test]
    fn test_clear_drops_items_and_coupon() {
        let mut cart = user_cart();
        cart.add_item(&snapshot("ESP", 1000), 2, ItemOptions::new(), Utc::now())
            .unwrap();
        cart.apply_coupon(applied(500));
        cart.clear();

        assert!(cart.is_empty());
        assert!(cart.coupon().is_none());
        assert_eq!(cart.totals().discount_amount, Money::zero());
    }

    #[test]
    fn test_refresh_item_price() {
        let mut cart = user_cart();
        let id = cart
            .add_item(&snapshot("ESP", 1000), 1, ItemOptions::new(), Utc::now())
            .unwrap();

        assert!(!cart.refresh_item_price(id, &snapshot("ESP", 1000)));
        assert!(cart.refresh_item_price(id, &snapshot("ESP", 1200)));
        assert_eq!(cart.subtotal(), Money::from_cents(1200));
    }

    #[test]
    fn test_anonymous_cart_expires() {
        let now = Utc::now();
        let mut cart = Cart::new(
            Owner::Session(SessionToken::new("s1")),
            now,
            Duration::hours(2),
        );
        assert!(!cart.is_expired(now + Duration::hours(1)));
        assert!(cart.is_expired(now + Duration::hours(2)));

        cart.touch(now + Duration::hours(1), Duration::hours(2));
        assert!(!cart.is_expired(now + Duration::hours(2)));

        // User carts never expire
        let user = user_cart();
        assert!(user.expires_at().is_none());
        assert!(!user.is_expired(now + Duration::days(365)));
    }

    #[test]
    fn test_absorb_merges_lines_and_keeps_own_coupon() {
        let mut user = user_cart();
        user.add_item(&snapshot("ESP", 1000), 1, ItemOptions::new(), Utc::now())
            .unwrap();
        user.apply_coupon(applied(100));

        let mut session = Cart::new(
            Owner::Session(SessionToken::new("s1")),
            Utc::now(),
            Duration::hours(1),
        );
        session
            .add_item(&snapshot("ESP", 1000), 2, ItemOptions::new(), Utc::now())
            .unwrap();
        session
            .add_item(&snapshot("LAT", 500), 1, ItemOptions::new(), Utc::now())
            .unwrap();
        session.apply_coupon(applied(200));

        user.absorb(&session);
        assert_eq!(user.items().len(), 2);
        assert_eq!(user.items()[0].quantity, 3);
        assert_eq!(user.coupon().unwrap().discount, Money::from_cents(100));
    }

    #[test]
    fn test_keyed_by_owner() {
        let cart = Cart::new(
            Owner::Session(SessionToken::new("abc")),
            Utc::now(),
            Duration::hours(1),
        );
        assert_eq!(cart.entity_id(), "session:abc");
    }
}
