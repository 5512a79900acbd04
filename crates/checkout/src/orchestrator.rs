//! Checkout orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{Money, OrderId, Owner, ProductId, UsageId};
use domain::{
    Cart, CustomerInfo, NewOrder, Order, OrderItem, OrderTotals, PaymentMethod, Repository,
    ShippingAddress,
};
use serde::Deserialize;
use store::RecordStore;
use tokio::sync::Mutex;

use crate::attempt::{CheckoutAttempt, CompensationGuard, Compensator};
use crate::cart::CartService;
use crate::catalog::CatalogReadModel;
use crate::config::CheckoutConfig;
use crate::coupons::{ConsumeRequest, CouponEvaluator};
use crate::error::{CheckoutError, Result, StockShortfall};
use crate::reservation::{Reservation, StockReservationManager};
use crate::state::CheckoutState;

/// Customer-supplied details for placing an order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutDetails {
    pub customer: CustomerInfo,
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub note: Option<String>,
}

/// Turns a cart into an order, or leaves no trace.
///
/// Steps run in order: validate lines against the catalog, reserve stock
/// for each product, consume the coupon, persist the order, confirm the
/// reservations. Any failure compensates every step taken so far. The cart
/// is emptied once the order stands, outside the checkout timeout.
pub struct CheckoutOrchestrator<S: RecordStore + Clone + 'static> {
    carts: CartService<S>,
    catalog: CatalogReadModel<S>,
    reservations: StockReservationManager<S>,
    coupons: CouponEvaluator<S>,
    orders: Repository<S, Order>,
    config: CheckoutConfig,
}

impl<S: RecordStore + Clone + 'static> Clone for CheckoutOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            carts: self.carts.clone(),
            catalog: self.catalog.clone(),
            reservations: self.reservations.clone(),
            coupons: self.coupons.clone(),
            orders: self.orders.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: RecordStore + Clone + 'static> CheckoutOrchestrator<S> {
    pub fn new(store: S, config: CheckoutConfig) -> Self {
        let retries = config.max_conflict_retries;
        Self {
            carts: CartService::new(store.clone(), config.clone()),
            catalog: CatalogReadModel::new(store.clone()),
            reservations: StockReservationManager::new(store.clone(), retries),
            coupons: CouponEvaluator::new(store.clone(), retries),
            orders: Repository::new(store),
            config,
        }
    }

    fn compensator(&self) -> Compensator<S> {
        Compensator::new(
            self.reservations.clone(),
            self.coupons.clone(),
            self.orders.clone(),
        )
    }

    /// Checks out the owner's cart within the configured timeout.
    pub async fn checkout(&self, owner: &Owner, details: CheckoutDetails) -> Result<Order> {
        self.checkout_within(owner, details, self.config.checkout_timeout)
            .await
    }

    /// Checks out the owner's cart, cancelling if it takes longer than `timeout`.
    ///
    /// On any failure, including the timeout, compensation has finished by
    /// the time this returns. If the returned future itself is dropped,
    /// compensation is spawned onto the runtime instead. A run that reached
    /// `Completed` returns its order even if the timer fired as it finished.
    #[tracing::instrument(skip(self, details), fields(owner = %owner))]
    pub async fn checkout_within(
        &self,
        owner: &Owner,
        details: CheckoutDetails,
        timeout: Duration,
    ) -> Result<Order> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let attempt = Arc::new(Mutex::new(CheckoutAttempt::new(
            OrderId::new(),
            owner.clone(),
        )));
        let mut guard = CompensationGuard::new(self.compensator(), Arc::clone(&attempt));

        let result = match tokio::time::timeout(timeout, self.run(owner, details, &attempt)).await
        {
            Ok(result) => result,
            Err(_) => {
                let attempt = attempt.lock().await;
                match attempt.order() {
                    Some(order) if *attempt.state() == CheckoutState::Completed => {
                        tracing::warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "checkout timer fired after completion"
                        );
                        Ok(order.clone())
                    }
                    _ => {
                        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "checkout timed out");
                        Err(CheckoutError::Cancelled)
                    }
                }
            }
        };

        let outcome = match result {
            Ok(order) => {
                metrics::counter!("checkout_completed_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    order_number = order.order_number(),
                    total = %order.totals().total_amount,
                    "checkout completed"
                );
                Ok(order)
            }
            Err(err) => {
                let mut attempt = attempt.lock().await;
                attempt.fail(err.kind());
                if let Err(compensation_error) = self.compensator().compensate(&mut attempt).await
                {
                    tracing::error!(
                        order_id = %attempt.order_id(),
                        error = %compensation_error,
                        "compensation incomplete"
                    );
                }
                metrics::counter!("checkout_failed_total", "reason" => err.kind()).increment(1);
                tracing::warn!(error = %err, kind = err.kind(), "checkout failed");
                Err(err)
            }
        };

        guard.disarm();

        if let Ok(order) = &outcome {
            // The order stands even if the cart cannot be emptied
            if let Err(e) = self.carts.clear(owner).await {
                tracing::warn!(order_id = %order.id(), error = %e, "failed to clear cart after checkout");
            }
        }
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        outcome
    }

    /// Runs the steps. The attempt lock is held throughout, so a timed-out
    /// run is fully stopped before compensation reads the attempt.
    ///
    /// Each write is recorded on the attempt before it is issued, so a run
    /// dropped mid-write leaves enough behind to undo it.
    async fn run(
        &self,
        owner: &Owner,
        details: CheckoutDetails,
        attempt: &Mutex<CheckoutAttempt>,
    ) -> Result<Order> {
        let mut attempt = attempt.lock().await;

        let cart = self.carts.get_cart(owner).await?;
        if cart.is_empty() {
            return Err(CheckoutError::Validation("cart is empty".to_string()));
        }
        let working = self.validate_lines(&cart).await?;

        attempt.advance(CheckoutState::ReservingStock);
        for (product_id, quantity) in quantities_by_product(&working) {
            let reservation = Reservation::new(product_id, quantity);
            let index = attempt.intend_hold(reservation.clone());
            self.reservations.hold(&reservation).await?;
            attempt.mark_held(index);
        }

        attempt.advance(CheckoutState::ApplyingCoupon);
        let subtotal = working.subtotal();
        let mut discount = Money::zero();
        let mut coupon_code = None;
        if let Some(applied) = working.coupon() {
            let preview = self.coupons.validate(&applied.code, subtotal, owner).await?;
            if let Some(reason) = preview.reason {
                return Err(CheckoutError::CouponNoLongerValid(reason));
            }
            let usage_id = UsageId::new();
            attempt.claim_coupon(usage_id, &preview.code);
            let usage = self
                .coupons
                .consume(ConsumeRequest {
                    usage_id,
                    code: &preview.code,
                    order_id: attempt.order_id(),
                    owner,
                    original_amount: subtotal,
                    discount_amount: preview.discount_amount,
                })
                .await?;
            discount = usage.discount_amount;
            coupon_code = Some(usage.coupon_code);
        }

        attempt.advance(CheckoutState::CreatingOrder);
        let order = Order::place(NewOrder {
            id: attempt.order_id(),
            owner: owner.clone(),
            customer: details.customer,
            shipping_address: details.shipping_address,
            payment_method: details.payment_method,
            note: details.note,
            items: order_items(&working),
            coupon_code,
            totals: self.totals(subtotal, discount),
            placed_at: Utc::now(),
        })?;
        attempt.record_order(order.clone());
        self.orders.insert(&order).await?;

        for index in 0..attempt.holds().len() {
            let reservation = attempt.holds()[index].reservation.clone();
            attempt.mark_confirming(index);
            self.reservations
                .confirm(&reservation)
                .await
                .map_err(|e| {
                    CheckoutError::PersistenceFailure(format!(
                        "confirming stock for {}: {e}",
                        reservation.product_id
                    ))
                })?;
            attempt.mark_confirmed(index);
        }
        attempt.advance(CheckoutState::Completed);
        Ok(order)
    }

    /// Checks every line against the live catalog and returns the cart to
    /// order from, with stale prices re-snapshotted.
    async fn validate_lines(&self, cart: &Cart) -> Result<Cart> {
        let mut working = cart.clone();
        let mut sold_out = Vec::new();

        for item in cart.items() {
            let snapshot = match self.catalog.get_product_snapshot(&item.product_id).await {
                Ok(snapshot) => snapshot,
                Err(CheckoutError::NotFound { .. }) => {
                    return Err(CheckoutError::ProductUnavailable {
                        product_id: item.product_id.clone(),
                    });
                }
                Err(e) => return Err(e),
            };
            if !snapshot.is_active {
                return Err(CheckoutError::ProductUnavailable {
                    product_id: item.product_id.clone(),
                });
            }
            if snapshot.available_quantity == 0 {
                sold_out.push(StockShortfall {
                    product_id: item.product_id.clone(),
                    requested: item.quantity,
                    available: 0,
                });
                continue;
            }

            let live = snapshot.effective_price();
            if live.abs_diff(item.effective_unit_price()) > self.config.price_tolerance {
                tracing::info!(
                    product_id = %item.product_id,
                    snapshot = %item.effective_unit_price(),
                    live = %live,
                    "refreshing stale cart price"
                );
                metrics::counter!("cart_price_refreshes_total").increment(1);
                working.refresh_item_price(item.id, &snapshot);
            }
        }

        if !sold_out.is_empty() {
            return Err(CheckoutError::InsufficientStock {
                shortfalls: sold_out,
            });
        }
        Ok(working)
    }

    fn totals(&self, sub_total: Money, discount_amount: Money) -> OrderTotals {
        let after_discount = sub_total.saturating_sub(discount_amount);
        let tax = after_discount.percentage(self.config.tax_rate_bps);
        let shipping_fee = self.config.shipping.fee_for(sub_total);
        OrderTotals {
            sub_total,
            discount_amount,
            tax,
            shipping_fee,
            total_amount: after_discount + tax + shipping_fee,
        }
    }
}

/// Total quantity per product, in product id order.
///
/// A fixed order means two checkouts touching the same products always
/// reserve them in the same sequence.
fn quantities_by_product(cart: &Cart) -> BTreeMap<ProductId, u32> {
    let mut quantities = BTreeMap::new();
    for item in cart.items() {
        *quantities.entry(item.product_id.clone()).or_insert(0) += item.quantity;
    }
    quantities
}

fn order_items(cart: &Cart) -> Vec<OrderItem> {
    cart.items()
        .iter()
        .map(|item| OrderItem {
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            options: item.options.clone(),
            unit_price: item.effective_unit_price(),
            quantity: item.quantity,
            total: item.total_price(),
        })
        .collect()
}
