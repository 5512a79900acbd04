//! Stock reservation manager.
//!
//! Every operation is one version-conditioned update of the product record,
//! retried on conflict. Reservations on a single product are therefore
//! linearisable without any lock held across an await.

use common::{HoldId, ProductId};
use domain::{Product, Release, Repository, StockError};
use serde::{Deserialize, Serialize};
use store::RecordStore;

use crate::error::{CheckoutError, Result};

/// Units of one product held for a checkout, under a hold id.
///
/// The id is chosen before the hold is written, so a checkout can record
/// its intent first and undo the hold later whether or not it saw the
/// write complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: HoldId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl Reservation {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            id: HoldId::new(),
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Atomic reserve / release / confirm over product stock counters.
pub struct StockReservationManager<S: RecordStore> {
    products: Repository<S, Product>,
    max_retries: u32,
}

impl<S: RecordStore + Clone> Clone for StockReservationManager<S> {
    fn clone(&self) -> Self {
        Self {
            products: self.products.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<S: RecordStore> StockReservationManager<S> {
    pub fn new(store: S, max_retries: u32) -> Self {
        Self {
            products: Repository::new(store),
            max_retries,
        }
    }

    /// Holds `quantity` units if at least that many are available.
    ///
    /// On `InsufficientStock` nothing changes.
    pub async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<Reservation> {
        let reservation = Reservation::new(product_id.clone(), quantity);
        self.hold(&reservation).await?;
        Ok(reservation)
    }

    /// Writes a reservation built by the caller. Writing the same one twice
    /// holds stock once.
    #[tracing::instrument(skip(self), fields(product_id = %reservation.product_id, hold_id = %reservation.id))]
    pub async fn hold(&self, reservation: &Reservation) -> Result<()> {
        let quantity = reservation.quantity;
        if quantity == 0 {
            return Err(StockError::InvalidQuantity { quantity }.into());
        }

        let hold = reservation.id;
        let result = self
            .products
            .mutate(reservation.product_id.as_str(), self.max_retries, |p| {
                p.reserve_hold(hold, quantity)
            })
            .await;

        match result {
            Ok(_) => {
                metrics::counter!("stock_reservations_total", "outcome" => "reserved").increment(1);
                Ok(())
            }
            Err(e) => {
                let err = self.map_error(e);
                let outcome = match &err {
                    CheckoutError::InsufficientStock { .. } => "insufficient",
                    CheckoutError::Conflict { .. } => "conflict",
                    _ => "error",
                };
                metrics::counter!("stock_reservations_total", "outcome" => outcome).increment(1);
                Err(err)
            }
        }
    }

    /// Gives back held units. Releasing a hold the product does not know
    /// changes nothing and is logged as an invariant violation.
    #[tracing::instrument(skip(self), fields(product_id = %reservation.product_id, hold_id = %reservation.id))]
    pub async fn release(&self, reservation: &Reservation) -> Result<Release> {
        let release = self
            .release_hold(reservation)
            .await?
            .unwrap_or(Release {
                released: 0,
                shortfall: reservation.quantity,
            });

        if release.shortfall > 0 {
            tracing::error!(
                product_id = %reservation.product_id,
                requested = reservation.quantity,
                released = release.released,
                "invariant violation: released more stock than was reserved"
            );
            metrics::counter!("stock_invariant_violations_total").increment(1);
        }
        Ok(release)
    }

    /// Releases the hold if the product still has it.
    ///
    /// Returns false when it is absent: never written, already released
    /// or already confirmed.
    pub async fn release_if_held(&self, reservation: &Reservation) -> Result<bool> {
        Ok(self.release_hold(reservation).await?.is_some())
    }

    async fn release_hold(&self, reservation: &Reservation) -> Result<Option<Release>> {
        let hold = reservation.id;
        let mutation = self
            .products
            .mutate(reservation.product_id.as_str(), self.max_retries, |p| {
                Ok::<_, StockError>(p.release_hold(hold))
            })
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(mutation.output)
    }

    /// Turns a reservation into a sale: reserved and stock both drop.
    #[tracing::instrument(skip(self), fields(product_id = %reservation.product_id, hold_id = %reservation.id))]
    pub async fn confirm(&self, reservation: &Reservation) -> Result<()> {
        let hold = reservation.id;
        self.products
            .mutate(reservation.product_id.as_str(), self.max_retries, |p| {
                p.confirm_hold(hold)
            })
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    /// Returns sold units to stock (inverse of `confirm`).
    #[tracing::instrument(skip(self), fields(product_id = %reservation.product_id))]
    pub async fn restock(&self, reservation: &Reservation) -> Result<()> {
        let quantity = reservation.quantity;
        self.products
            .mutate(reservation.product_id.as_str(), self.max_retries, |p| {
                p.restock(quantity);
                Ok::<_, StockError>(())
            })
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }

    /// Releases every reservation, continuing past failures.
    ///
    /// Returns the first error after attempting all of them.
    pub async fn release_all(&self, reservations: &[Reservation]) -> Result<()> {
        let mut first_error = None;
        for reservation in reservations {
            if let Err(e) = self.release(reservation).await {
                tracing::error!(
                    product_id = %reservation.product_id,
                    error = %e,
                    "failed to release reservation"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn map_error(&self, e: domain::MutationError<StockError>) -> CheckoutError {
        let err = CheckoutError::from(e);
        if let CheckoutError::Conflict { id, .. } = &err {
            metrics::counter!("stock_reservation_conflicts_total").increment(1);
            tracing::warn!(product_id = %id, retries = self.max_retries, "stock update contended");
        }
        err
    }
}
