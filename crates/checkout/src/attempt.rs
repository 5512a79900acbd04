//! Bookkeeping for one checkout attempt and its compensation.
//!
//! Every side effect is recorded here before it is written, under an id the
//! write itself carries. Compensation walks the record and undoes by id
//! whatever may have landed, so it is correct whether or not a write was
//! seen to complete, and running it twice (for example once on failure and
//! once from a drop guard) is harmless.

use std::sync::Arc;

use common::{OrderId, Owner, UsageId};
use domain::{CouponRejection, Order, Repository};
use store::RecordStore;
use tokio::sync::Mutex;

use crate::coupons::CouponEvaluator;
use crate::error::{CheckoutError, Result};
use crate::reservation::{Reservation, StockReservationManager};
use crate::state::CheckoutState;

/// Where a reservation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldStatus {
    /// Recorded, the hold may or may not have been written.
    Pending,
    /// Reserved, not yet confirmed.
    Held,
    /// Confirmation started; stock may be held or already sold.
    Confirming,
    /// Confirmed into a sale.
    Confirmed,
    /// Compensated by releasing the reservation.
    Released,
    /// Compensated by returning confirmed stock.
    Restocked,
}

#[derive(Debug, Clone)]
pub struct HeldStock {
    pub reservation: Reservation,
    pub status: HoldStatus,
}

/// A coupon consumption this attempt started.
#[derive(Debug, Clone)]
pub struct ClaimedCoupon {
    pub usage_id: UsageId,
    pub code: String,
    /// Balance, used flag and usage count have been put back, or were
    /// never taken.
    pub counters_restored: bool,
    /// The usage row has been deleted, or was never written.
    pub ledger_removed: bool,
}

/// Side effects taken so far by one checkout.
#[derive(Debug)]
pub struct CheckoutAttempt {
    order_id: OrderId,
    owner: Owner,
    state: CheckoutState,
    holds: Vec<HeldStock>,
    coupon: Option<ClaimedCoupon>,
    order: Option<Order>,
    order_removed: bool,
}

impl CheckoutAttempt {
    pub fn new(order_id: OrderId, owner: Owner) -> Self {
        Self {
            order_id,
            owner,
            state: CheckoutState::default(),
            holds: Vec::new(),
            coupon: None,
            order: None,
            order_removed: false,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn state(&self) -> &CheckoutState {
        &self.state
    }

    pub fn holds(&self) -> &[HeldStock] {
        &self.holds
    }

    pub fn coupon(&self) -> Option<&ClaimedCoupon> {
        self.coupon.as_ref()
    }

    /// The order this attempt is writing or has written.
    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    /// Moves to the next state. Illegal transitions are ignored and logged.
    pub fn advance(&mut self, to: CheckoutState) {
        if !self.state.can_transition_to(&to) {
            tracing::error!(
                order_id = %self.order_id,
                from = %self.state,
                to = %to,
                "illegal checkout state transition"
            );
            return;
        }
        tracing::debug!(order_id = %self.order_id, step = to.as_str(), "checkout step");
        self.state = to;
    }

    /// Marks the attempt failed with the given error kind.
    pub fn fail(&mut self, reason: &'static str) {
        if !self.state.is_terminal() {
            self.state = CheckoutState::Failed { reason };
        }
    }

    /// Records a reservation about to be written and returns its index.
    pub fn intend_hold(&mut self, reservation: Reservation) -> usize {
        self.holds.push(HeldStock {
            reservation,
            status: HoldStatus::Pending,
        });
        self.holds.len() - 1
    }

    pub fn mark_held(&mut self, index: usize) {
        self.set_hold_status(index, HoldStatus::Held);
    }

    pub fn mark_confirming(&mut self, index: usize) {
        self.set_hold_status(index, HoldStatus::Confirming);
    }

    pub fn mark_confirmed(&mut self, index: usize) {
        self.set_hold_status(index, HoldStatus::Confirmed);
    }

    fn set_hold_status(&mut self, index: usize, status: HoldStatus) {
        if let Some(hold) = self.holds.get_mut(index) {
            hold.status = status;
        }
    }

    /// Records a coupon consumption about to be written under `usage_id`.
    pub fn claim_coupon(&mut self, usage_id: UsageId, code: &str) {
        self.coupon = Some(ClaimedCoupon {
            usage_id,
            code: code.to_string(),
            counters_restored: false,
            ledger_removed: false,
        });
    }

    /// Records the order about to be inserted.
    pub fn record_order(&mut self, order: Order) {
        self.order = Some(order);
    }

    /// True when nothing taken by this attempt is left to undo.
    pub fn is_settled(&self) -> bool {
        self.state == CheckoutState::Completed
            || (self
                .holds
                .iter()
                .all(|h| matches!(h.status, HoldStatus::Released | HoldStatus::Restocked))
                && self
                    .coupon
                    .as_ref()
                    .is_none_or(|c| c.ledger_removed && c.counters_restored)
                && (self.order.is_none() || self.order_removed))
    }
}

/// Undoes the side effects recorded in a `CheckoutAttempt`.
pub struct Compensator<S: RecordStore> {
    reservations: StockReservationManager<S>,
    coupons: CouponEvaluator<S>,
    orders: Repository<S, Order>,
}

impl<S: RecordStore + Clone> Clone for Compensator<S> {
    fn clone(&self) -> Self {
        Self {
            reservations: self.reservations.clone(),
            coupons: self.coupons.clone(),
            orders: self.orders.clone(),
        }
    }
}

impl<S: RecordStore> Compensator<S> {
    pub fn new(
        reservations: StockReservationManager<S>,
        coupons: CouponEvaluator<S>,
        orders: Repository<S, Order>,
    ) -> Self {
        Self {
            reservations,
            coupons,
            orders,
        }
    }

    /// Undoes everything still outstanding, in reverse order of creation.
    ///
    /// Keeps going past individual failures and returns the first one; the
    /// flags of failed steps stay unset so a later run can retry them.
    #[tracing::instrument(skip(self, attempt), fields(order_id = %attempt.order_id))]
    pub async fn compensate(&self, attempt: &mut CheckoutAttempt) -> Result<()> {
        if attempt.state == CheckoutState::Completed || attempt.is_settled() {
            return Ok(());
        }
        let mut first_error: Option<CheckoutError> = None;

        if attempt.order.is_some() && !attempt.order_removed {
            match self.orders.delete(&attempt.order_id.to_string()).await {
                Ok(_) => attempt.order_removed = true,
                Err(e) => {
                    tracing::error!(error = %e, "failed to remove order during compensation");
                    first_error.get_or_insert(e.into());
                }
            }
        }

        for hold in attempt.holds.iter_mut().rev() {
            match self.return_stock(hold).await {
                Ok(status) => hold.status = status,
                Err(e) => {
                    tracing::error!(
                        product_id = %hold.reservation.product_id,
                        hold_id = %hold.reservation.id,
                        error = %e,
                        "failed to return stock during compensation"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(claimed) = attempt.coupon.as_mut() {
            if let Err(e) = self.reverse_coupon(claimed).await {
                tracing::error!(
                    code = %claimed.code,
                    usage_id = %claimed.usage_id,
                    error = %e,
                    "failed to reverse coupon during compensation"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                metrics::counter!("checkout_compensations_total", "outcome" => "failed")
                    .increment(1);
                Err(e)
            }
            None => {
                metrics::counter!("checkout_compensations_total", "outcome" => "completed")
                    .increment(1);
                tracing::info!("checkout compensated");
                Ok(())
            }
        }
    }

    /// Undoes one reservation and returns its new status.
    async fn return_stock(&self, hold: &HeldStock) -> Result<HoldStatus> {
        let reservation = &hold.reservation;
        match hold.status {
            HoldStatus::Pending => {
                self.reservations.release_if_held(reservation).await?;
                Ok(HoldStatus::Released)
            }
            HoldStatus::Held => {
                self.reservations.release(reservation).await?;
                Ok(HoldStatus::Released)
            }
            HoldStatus::Confirming => {
                if self.reservations.release_if_held(reservation).await? {
                    Ok(HoldStatus::Released)
                } else {
                    self.reservations.restock(reservation).await?;
                    Ok(HoldStatus::Restocked)
                }
            }
            HoldStatus::Confirmed => {
                self.reservations.restock(reservation).await?;
                Ok(HoldStatus::Restocked)
            }
            status @ (HoldStatus::Released | HoldStatus::Restocked) => Ok(status),
        }
    }

    async fn reverse_coupon(&self, claimed: &mut ClaimedCoupon) -> Result<()> {
        if !claimed.counters_restored {
            match self.coupons.restore_counters(&claimed.code, claimed.usage_id).await {
                // A deleted coupon has no counters left to restore
                Ok(_) | Err(CheckoutError::CouponNoLongerValid(CouponRejection::NotFound)) => {
                    claimed.counters_restored = true;
                }
                Err(e) => return Err(e),
            }
        }
        if !claimed.ledger_removed {
            self.coupons.remove_usage(claimed.usage_id).await?;
            claimed.ledger_removed = true;
        }
        Ok(())
    }
}

/// Runs compensation in the background if dropped while armed.
///
/// Covers the checkout future being dropped mid-flight (client gone,
/// outer timeout) where no code after the await point ever runs.
pub struct CompensationGuard<S: RecordStore + Clone + 'static> {
    compensator: Compensator<S>,
    attempt: Arc<Mutex<CheckoutAttempt>>,
    armed: bool,
}

impl<S: RecordStore + Clone + 'static> CompensationGuard<S> {
    pub fn new(compensator: Compensator<S>, attempt: Arc<Mutex<CheckoutAttempt>>) -> Self {
        Self {
            compensator,
            attempt,
            armed: true,
        }
    }

    /// The attempt has been settled by the caller; dropping does nothing.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: RecordStore + Clone + 'static> Drop for CompensationGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let compensator = self.compensator.clone();
        let attempt = Arc::clone(&self.attempt);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut attempt = attempt.lock().await;
                    if *attempt.state() == CheckoutState::Completed {
                        return;
                    }
                    attempt.fail(CheckoutError::Cancelled.kind());
                    metrics::counter!("checkout_failed_total", "reason" => "cancelled")
                        .increment(1);
                    if let Err(e) = compensator.compensate(&mut attempt).await {
                        tracing::error!(
                            order_id = %attempt.order_id(),
                            error = %e,
                            "background compensation failed"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!("checkout dropped outside a runtime, compensation skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, SessionToken};
    use domain::{Coupon, Discount, Product};
    use store::InMemoryRecordStore;

    fn owner() -> Owner {
        Owner::Session(SessionToken::new("s1"))
    }

    type Fixture = (
        Compensator<InMemoryRecordStore>,
        StockReservationManager<InMemoryRecordStore>,
        Repository<InMemoryRecordStore, Product>,
    );

    async fn setup() -> Fixture {
        let store = InMemoryRecordStore::new();
        let products: Repository<_, Product> = Repository::new(store.clone());
        products
            .insert(&Product::new("ESP", "Espresso", Money::from_cents(1000), 5).unwrap())
            .await
            .unwrap();
        let reservations = StockReservationManager::new(store.clone(), 16);
        let compensator = Compensator::new(
            reservations.clone(),
            CouponEvaluator::new(store.clone(), 16),
            Repository::new(store),
        );
        (compensator, reservations, products)
    }

    #[test]
    fn test_new_attempt_is_settled() {
        let attempt = CheckoutAttempt::new(OrderId::new(), owner());
        assert!(attempt.is_settled());
        assert_eq!(attempt.state(), &CheckoutState::Validating);
    }

    #[test]
    fn test_illegal_advance_is_ignored() {
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());
        attempt.advance(CheckoutState::Completed);
        assert_eq!(attempt.state(), &CheckoutState::Validating);

        attempt.advance(CheckoutState::ReservingStock);
        assert_eq!(attempt.state(), &CheckoutState::ReservingStock);
    }

    async fn hold(
        attempt: &mut CheckoutAttempt,
        reservations: &StockReservationManager<InMemoryRecordStore>,
        quantity: u32,
    ) -> usize {
        let reservation = Reservation::new("ESP", quantity);
        let index = attempt.intend_hold(reservation.clone());
        reservations.hold(&reservation).await.unwrap();
        attempt.mark_held(index);
        index
    }

    #[tokio::test]
    async fn test_compensation_releases_held_stock_once() {
        let (compensator, reservations, products) = setup().await;
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());
        attempt.advance(CheckoutState::ReservingStock);
        hold(&mut attempt, &reservations, 3).await;
        assert!(!attempt.is_settled());

        attempt.fail("insufficient_stock");
        compensator.compensate(&mut attempt).await.unwrap();
        compensator.compensate(&mut attempt).await.unwrap();

        assert!(attempt.is_settled());
        assert_eq!(attempt.holds()[0].status, HoldStatus::Released);
        assert_eq!(products.get("ESP").await.unwrap().unwrap().reserved_quantity(), 0);
    }

    #[tokio::test]
    async fn test_pending_hold_is_released_if_it_landed() {
        let (compensator, reservations, products) = setup().await;
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());

        // Written, but the attempt never saw it complete
        let landed = Reservation::new("ESP", 2);
        attempt.intend_hold(landed.clone());
        reservations.hold(&landed).await.unwrap();
        // Never written
        attempt.intend_hold(Reservation::new("ESP", 1));

        compensator.compensate(&mut attempt).await.unwrap();

        assert!(attempt.is_settled());
        let product = products.get("ESP").await.unwrap().unwrap();
        assert_eq!(product.reserved_quantity(), 0);
        assert_eq!(product.stock_quantity(), 5);
    }

    #[tokio::test]
    async fn test_confirming_hold_is_undone_either_way() {
        let (compensator, reservations, products) = setup().await;
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());

        let sold = hold(&mut attempt, &reservations, 2).await;
        attempt.mark_confirming(sold);
        reservations
            .confirm(&attempt.holds()[sold].reservation)
            .await
            .unwrap();
        let unsold = hold(&mut attempt, &reservations, 1).await;
        attempt.mark_confirming(unsold);

        compensator.compensate(&mut attempt).await.unwrap();

        assert_eq!(attempt.holds()[sold].status, HoldStatus::Restocked);
        assert_eq!(attempt.holds()[unsold].status, HoldStatus::Released);
        let product = products.get("ESP").await.unwrap().unwrap();
        assert_eq!(product.stock_quantity(), 5);
        assert_eq!(product.reserved_quantity(), 0);
    }

    #[tokio::test]
    async fn test_compensation_restocks_confirmed_stock() {
        let (compensator, reservations, products) = setup().await;
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());
        let index = hold(&mut attempt, &reservations, 2).await;
        reservations
            .confirm(&attempt.holds()[index].reservation)
            .await
            .unwrap();
        attempt.mark_confirmed(index);

        compensator.compensate(&mut attempt).await.unwrap();

        let product = products.get("ESP").await.unwrap().unwrap();
        assert_eq!(product.stock_quantity(), 5);
        assert_eq!(product.reserved_quantity(), 0);
        assert_eq!(attempt.holds()[0].status, HoldStatus::Restocked);
    }

    #[tokio::test]
    async fn test_claimed_coupon_reversed_without_ledger_row() {
        let (compensator, _, _) = setup().await;
        let coupons = compensator.coupons.clone();
        let now = chrono::Utc::now();
        coupons
            .upsert_coupon(&Coupon::one_time(
                "ONCE",
                Discount::FixedAmount {
                    amount: Money::from_cents(100),
                },
                now - chrono::Duration::days(1),
                now + chrono::Duration::days(1),
            ))
            .await
            .unwrap();

        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());
        let usage_id = UsageId::new();
        attempt.claim_coupon(usage_id, "ONCE");
        let owner = owner();
        coupons
            .consume(crate::coupons::ConsumeRequest {
                usage_id,
                code: "ONCE",
                order_id: attempt.order_id(),
                owner: &owner,
                original_amount: Money::from_cents(1000),
                discount_amount: Money::from_cents(100),
            })
            .await
            .unwrap();
        // Counters taken, ledger row lost
        coupons.remove_usage(usage_id).await.unwrap();

        compensator.compensate(&mut attempt).await.unwrap();

        assert!(attempt.is_settled());
        let coupon = coupons.get_coupon("ONCE").await.unwrap();
        assert!(!coupon.is_used());
        assert_eq!(coupon.usage_count(), 0);
    }

    #[tokio::test]
    async fn test_claim_that_never_landed_changes_nothing() {
        let (compensator, _, _) = setup().await;
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());
        attempt.claim_coupon(UsageId::new(), "GONE");

        compensator.compensate(&mut attempt).await.unwrap();
        assert!(attempt.is_settled());
    }

    #[tokio::test]
    async fn test_completed_attempt_is_left_alone() {
        let (compensator, reservations, products) = setup().await;
        let mut attempt = CheckoutAttempt::new(OrderId::new(), owner());
        attempt.advance(CheckoutState::ReservingStock);
        hold(&mut attempt, &reservations, 1).await;
        attempt.advance(CheckoutState::ApplyingCoupon);
        attempt.advance(CheckoutState::CreatingOrder);
        attempt.advance(CheckoutState::Completed);

        compensator.compensate(&mut attempt).await.unwrap();
        assert_eq!(products.get("ESP").await.unwrap().unwrap().reserved_quantity(), 1);
    }
}
