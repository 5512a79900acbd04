//! Cart service.
//!
//! Wraps the cart aggregate with catalog lookups, coupon previews, the
//! shipping policy and anonymous-cart expiry. Carts have a single writer
//! (their owner) but writes still go through the versioned update so two
//! browser tabs cannot silently overwrite each other.

use chrono::Utc;
use common::{CartItemId, Owner, ProductId, SessionToken, UserId};
use domain::{AppliedCoupon, Cart, CartTotals, Entity, ItemOptions, Repository, StockError};
use store::RecordStore;

use crate::catalog::CatalogReadModel;
use crate::config::CheckoutConfig;
use crate::coupons::CouponEvaluator;
use crate::error::{CheckoutError, Result};

/// Owner-scoped cart operations.
pub struct CartService<S: RecordStore> {
    carts: Repository<S, Cart>,
    catalog: CatalogReadModel<S>,
    coupons: CouponEvaluator<S>,
    config: CheckoutConfig,
}

impl<S: RecordStore + Clone> Clone for CartService<S> {
    fn clone(&self) -> Self {
        Self {
            carts: self.carts.clone(),
            catalog: self.catalog.clone(),
            coupons: self.coupons.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: RecordStore + Clone> CartService<S> {
    pub fn new(store: S, config: CheckoutConfig) -> Self {
        Self {
            carts: Repository::new(store.clone()),
            catalog: CatalogReadModel::new(store.clone()),
            coupons: CouponEvaluator::new(store, config.max_conflict_retries),
            config,
        }
    }
}

impl<S: RecordStore> CartService<S> {
    /// The owner's cart. Missing or expired carts read as a fresh empty one.
    pub async fn get_cart(&self, owner: &Owner) -> Result<Cart> {
        let now = Utc::now();
        match self.carts.get(&owner.key()).await? {
            Some(cart) if !cart.is_expired(now) => Ok(cart),
            _ => Ok(self.empty_cart(owner)),
        }
    }

    pub async fn get_totals(&self, owner: &Owner) -> Result<CartTotals> {
        Ok(self.get_cart(owner).await?.totals())
    }

    /// Adds a product at its current catalog price.
    #[tracing::instrument(skip(self, options), fields(owner = %owner))]
    pub async fn add_item(
        &self,
        owner: &Owner,
        product_id: &ProductId,
        quantity: u32,
        options: ItemOptions,
    ) -> Result<Cart> {
        if quantity == 0 {
            return Err(StockError::InvalidQuantity { quantity }.into());
        }
        let snapshot = match self.catalog.get_product_snapshot(product_id).await {
            Err(CheckoutError::NotFound { .. }) => {
                return Err(CheckoutError::ProductUnavailable {
                    product_id: product_id.clone(),
                });
            }
            other => other?,
        };
        if !snapshot.is_active {
            return Err(CheckoutError::ProductUnavailable {
                product_id: product_id.clone(),
            });
        }

        let now = Utc::now();
        self.modify(owner, |cart| {
            let in_cart: u32 = cart
                .items()
                .iter()
                .filter(|i| &i.product_id == product_id)
                .map(|i| i.quantity)
                .sum();
            let wanted = in_cart.saturating_add(quantity);
            if wanted > snapshot.available_quantity {
                return Err(StockError::Insufficient {
                    product_id: product_id.clone(),
                    requested: wanted,
                    available: snapshot.available_quantity,
                }
                .into());
            }
            cart.add_item(&snapshot, quantity, options.clone(), now)?;
            Ok(())
        })
        .await
    }

    /// Sets a line's quantity (at least 1).
    ///
    /// Raising a line is checked against current availability the same way
    /// `add_item` is; lowering one always succeeds.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn update_item_quantity(
        &self,
        owner: &Owner,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Cart> {
        let line = self
            .get_cart(owner)
            .await?
            .items()
            .iter()
            .find(|i| i.id == item_id)
            .map(|i| (i.product_id.clone(), i.quantity));

        let limit = match line {
            Some((product_id, current)) if quantity > current => {
                match self.catalog.get_product_snapshot(&product_id).await {
                    Ok(snapshot) if snapshot.is_active => {
                        Some((product_id, snapshot.available_quantity))
                    }
                    Ok(_) | Err(CheckoutError::NotFound { .. }) => {
                        return Err(CheckoutError::ProductUnavailable { product_id });
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };

        self.modify(owner, |cart| {
            if let Some((product_id, available)) = &limit {
                let others: u32 = cart
                    .items()
                    .iter()
                    .filter(|i| &i.product_id == product_id && i.id != item_id)
                    .map(|i| i.quantity)
                    .sum();
                let wanted = others.saturating_add(quantity);
                if wanted > *available {
                    return Err(StockError::Insufficient {
                        product_id: product_id.clone(),
                        requested: wanted,
                        available: *available,
                    }
                    .into());
                }
            }
            cart.update_item_quantity(item_id, quantity)?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn remove_item(&self, owner: &Owner, item_id: CartItemId) -> Result<Cart> {
        self.modify(owner, |cart| {
            cart.remove_item(item_id)?;
            Ok(())
        })
        .await
    }

    /// Empties the cart and drops its coupon.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn clear(&self, owner: &Owner) -> Result<Cart> {
        self.modify(owner, |cart| {
            cart.clear();
            Ok(())
        })
        .await
    }

    /// Previews a coupon and attaches it. Nothing is consumed.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn apply_coupon(&self, owner: &Owner, code: &str) -> Result<Cart> {
        let subtotal = self.get_cart(owner).await?.subtotal();
        let preview = self
            .coupons
            .validate(code, subtotal, owner)
            .await?
            .into_applicable()?;
        let coupon_id = preview.coupon_id.ok_or(CheckoutError::CouponIneligible(
            domain::CouponRejection::NotFound,
        ))?;

        let applied = AppliedCoupon {
            coupon_id,
            code: preview.code,
            discount: preview.discount_amount,
        };
        self.modify(owner, |cart| {
            cart.apply_coupon(applied.clone());
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn remove_coupon(&self, owner: &Owner) -> Result<Cart> {
        self.modify(owner, |cart| {
            cart.remove_coupon();
            Ok(())
        })
        .await
    }

    /// Folds an anonymous session cart into the user's cart after login.
    ///
    /// Lines merge by (product, options). The user's coupon wins over the
    /// session's. The session cart is deleted afterwards, so merging twice
    /// is the same as merging once.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn merge_session_cart(&self, session: &SessionToken, user_id: UserId) -> Result<Cart> {
        let session_owner = Owner::Session(session.clone());
        let user_owner = Owner::User(user_id);

        let session_cart = match self.carts.get(&session_owner.key()).await? {
            Some(cart) if !cart.is_expired(Utc::now()) && !cart.is_empty() => cart,
            Some(_) => {
                self.carts.delete(&session_owner.key()).await?;
                return self.get_cart(&user_owner).await;
            }
            None => return self.get_cart(&user_owner).await,
        };

        let merged = self
            .modify(&user_owner, |cart| {
                cart.absorb(&session_cart);
                Ok(())
            })
            .await?;
        self.carts.delete(&session_owner.key()).await?;

        tracing::info!(
            lines = merged.items().len(),
            "merged session cart into user cart"
        );
        Ok(merged)
    }

    /// Read-modify-write of the owner's cart with derived state refreshed.
    async fn modify<F>(&self, owner: &Owner, mut change: F) -> Result<Cart>
    where
        F: FnMut(&mut Cart) -> Result<()>,
    {
        let key = owner.key();
        let attempts = self.config.max_conflict_retries.saturating_add(1);

        for _ in 0..attempts {
            let now = Utc::now();
            let loaded = self.carts.load(&key).await?;
            let (mut cart, version) = match loaded {
                Some(v) if !v.entity.is_expired(now) => (v.entity, Some(v.version)),
                // An expired cart is replaced in place
                Some(v) => (self.empty_cart(owner), Some(v.version)),
                None => (self.empty_cart(owner), None),
            };

            change(&mut cart)?;
            self.refresh_derived(&mut cart).await?;
            cart.touch(now, self.config.anonymous_cart_ttl);

            let written = match version {
                Some(version) => self.carts.save(&cart, version).await.map(|_| ()),
                None => self.carts.insert(&cart).await.map(|_| ()),
            };
            match written {
                Ok(()) => return Ok(cart),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(CheckoutError::Conflict {
            entity: Cart::KIND,
            id: key,
        })
    }

    /// Re-previews the coupon against the new subtotal and re-prices shipping.
    ///
    /// A coupon that no longer applies is dropped from the cart.
    async fn refresh_derived(&self, cart: &mut Cart) -> Result<()> {
        if let Some(applied) = cart.coupon().cloned() {
            let preview = self
                .coupons
                .validate(&applied.code, cart.subtotal(), cart.owner())
                .await?;
            if preview.applicable {
                cart.apply_coupon(AppliedCoupon {
                    discount: preview.discount_amount,
                    ..applied
                });
            } else {
                tracing::info!(
                    code = %applied.code,
                    reason = preview.reason.map(|r| r.as_str()).unwrap_or("unknown"),
                    "coupon no longer applies, removing from cart"
                );
                cart.remove_coupon();
            }
        }
        cart.set_shipping_fee(self.config.shipping.fee_for(cart.subtotal()));
        Ok(())
    }

    fn empty_cart(&self, owner: &Owner) -> Cart {
        Cart::new(owner.clone(), Utc::now(), self.config.anonymous_cart_ttl)
    }
}
