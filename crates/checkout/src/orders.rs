//! Order queries and post-checkout lifecycle.

use chrono::Utc;
use common::{OrderId, Owner};
use domain::{Entity, Order, OrderStatus, PaymentStatus, Repository};
use store::RecordStore;

use crate::error::{CheckoutError, Result};
use crate::reservation::{Reservation, StockReservationManager};

/// Reads placed orders and moves them through their lifecycle.
pub struct OrderService<S: RecordStore> {
    orders: Repository<S, Order>,
    reservations: StockReservationManager<S>,
    max_retries: u32,
}

impl<S: RecordStore + Clone> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            reservations: self.reservations.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<S: RecordStore + Clone> OrderService<S> {
    pub fn new(store: S, max_retries: u32) -> Self {
        Self {
            orders: Repository::new(store.clone()),
            reservations: StockReservationManager::new(store, max_retries),
            max_retries,
        }
    }
}

impl<S: RecordStore> OrderService<S> {
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(&id.to_string())
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Fetches an order, hiding orders that belong to someone else.
    pub async fn get_order_for(&self, owner: &Owner, id: OrderId) -> Result<Order> {
        let order = self.get_order(id).await?;
        if order.owner() != owner {
            return Err(not_found(id));
        }
        Ok(order)
    }

    /// The owner's orders, newest first.
    pub async fn list_orders(&self, owner: &Owner) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .list()
            .await?
            .into_iter()
            .filter(|o| o.owner() == owner)
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    /// Moves an order along its lifecycle. Cancelling also returns stock.
    #[tracing::instrument(skip(self), fields(order_id = %id, to = %to))]
    pub async fn advance_status(&self, id: OrderId, to: OrderStatus) -> Result<Order> {
        if to == OrderStatus::Cancelled {
            return self.cancel_order(id).await;
        }
        let mutation = self
            .orders
            .mutate(&id.to_string(), self.max_retries, |order| {
                order.transition_to(to, Utc::now())
            })
            .await?;
        tracing::info!(status = %mutation.entity.status(), "order status changed");
        Ok(mutation.entity)
    }

    /// Cancels a pending or confirmed order and returns its stock.
    #[tracing::instrument(skip(self), fields(order_id = %id))]
    pub async fn cancel_order(&self, id: OrderId) -> Result<Order> {
        let mutation = self
            .orders
            .mutate(&id.to_string(), self.max_retries, |order| {
                order.cancel(Utc::now())
            })
            .await?;
        let order = mutation.entity;

        let mut first_error = None;
        for item in order.items() {
            let reservation = Reservation::new(item.product_id.clone(), item.quantity);
            if let Err(e) = self.reservations.restock(&reservation).await {
                tracing::error!(
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    error = %e,
                    "failed to restock cancelled order line"
                );
                first_error.get_or_insert(e);
            }
        }
        metrics::counter!("orders_cancelled_total").increment(1);

        match first_error {
            Some(e) => Err(CheckoutError::PersistenceFailure(format!(
                "order {} cancelled but stock was not fully returned: {e}",
                order.order_number()
            ))),
            None => Ok(order),
        }
    }

    pub async fn record_payment(&self, id: OrderId, status: PaymentStatus) -> Result<Order> {
        let mutation = self
            .orders
            .mutate(&id.to_string(), self.max_retries, |order| {
                order.record_payment(status, Utc::now())
            })
            .await?;
        Ok(mutation.entity)
    }
}

fn not_found(id: OrderId) -> CheckoutError {
    CheckoutError::NotFound {
        entity: Order::KIND,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, ProductId, SessionToken, UserId};
    use domain::{CustomerInfo, ItemOptions, NewOrder, OrderItem, OrderTotals, Product};
    use store::InMemoryRecordStore;

    async fn placed(store: &InMemoryRecordStore, owner: Owner) -> Order {
        let order = Order::place(NewOrder {
            id: OrderId::new(),
            owner,
            customer: CustomerInfo::default(),
            shipping_address: Default::default(),
            payment_method: Default::default(),
            note: None,
            items: vec![OrderItem {
                product_id: ProductId::new("ESP"),
                product_name: "Espresso".to_string(),
                options: ItemOptions::new(),
                unit_price: Money::from_cents(300),
                quantity: 2,
                total: Money::from_cents(600),
            }],
            coupon_code: None,
            totals: OrderTotals::default(),
            placed_at: Utc::now(),
        })
        .unwrap();
        Repository::<_, Order>::new(store.clone())
            .insert(&order)
            .await
            .unwrap();
        order
    }

    fn user() -> Owner {
        Owner::User(UserId::new())
    }

    #[tokio::test]
    async fn test_get_order_hides_other_owners() {
        let store = InMemoryRecordStore::new();
        let service = OrderService::new(store.clone(), 8);
        let owner = user();
        let order = placed(&store, owner.clone()).await;

        assert!(service.get_order_for(&owner, order.id()).await.is_ok());
        let other = Owner::Session(SessionToken::new("someone-else"));
        let result = service.get_order_for(&other, order.id()).await;
        assert!(matches!(result, Err(CheckoutError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_orders_filters_by_owner() {
        let store = InMemoryRecordStore::new();
        let service = OrderService::new(store.clone(), 8);
        let owner = user();
        placed(&store, owner.clone()).await;
        placed(&store, owner.clone()).await;
        placed(&store, user()).await;

        assert_eq!(service.list_orders(&owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_advance_status() {
        let store = InMemoryRecordStore::new();
        let service = OrderService::new(store.clone(), 8);
        let order = placed(&store, user()).await;

        let order = service
            .advance_status(order.id(), OrderStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);

        let result = service.advance_status(order.id(), OrderStatus::Delivered).await;
        assert!(matches!(result, Err(CheckoutError::Order(_))));
    }

    #[tokio::test]
    async fn test_cancel_returns_stock() {
        let store = InMemoryRecordStore::new();
        let products: Repository<_, Product> = Repository::new(store.clone());
        products
            .insert(&Product::new("ESP", "Espresso", Money::from_cents(300), 3).unwrap())
            .await
            .unwrap();
        let service = OrderService::new(store.clone(), 8);
        let order = placed(&store, user()).await;

        let order = service.cancel_order(order.id()).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(products.get("ESP").await.unwrap().unwrap().stock_quantity(), 5);

        // A second cancel is an invalid transition and restocks nothing
        assert!(service.cancel_order(order.id()).await.is_err());
        assert_eq!(products.get("ESP").await.unwrap().unwrap().stock_quantity(), 5);
    }

    #[tokio::test]
    async fn test_record_payment() {
        let store = InMemoryRecordStore::new();
        let service = OrderService::new(store.clone(), 8);
        let order = placed(&store, user()).await;

        let order = service
            .record_payment(order.id(), PaymentStatus::Paid)
            .await
            .unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let service = OrderService::new(InMemoryRecordStore::new(), 8);
        let result = service.get_order(OrderId::new()).await;
        assert!(matches!(result, Err(CheckoutError::NotFound { entity: "order", .. })));
    }
}
