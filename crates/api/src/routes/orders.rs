//! Order lookup and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderStatus, PaymentStatus};
use serde::{Deserialize, Serialize};
use store::RecordStore;

use super::{AppState, parse_id};
use crate::error::ApiError;
use crate::identity::Caller;

// -- Request types --

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub status: PaymentStatus,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub status: String,
    pub payment_status: PaymentStatus,
    pub payment_method: domain::PaymentMethod,
    pub customer: domain::CustomerInfo,
    pub shipping_address: domain::ShippingAddress,
    pub note: Option<String>,
    pub coupon_code: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub sub_total_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub shipping_fee_cents: i64,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub options: domain::ItemOptions,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let totals = order.totals();
        Self {
            id: order.id().to_string(),
            order_number: order.order_number().to_string(),
            status: order.status().to_string(),
            payment_status: order.payment_status(),
            payment_method: order.payment_method(),
            customer: order.customer().clone(),
            shipping_address: order.shipping_address().clone(),
            note: order.note().map(String::from),
            coupon_code: order.coupon_code().map(String::from),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    product_name: item.product_name.clone(),
                    options: item.options.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                    total_cents: item.total.cents(),
                })
                .collect(),
            sub_total_cents: totals.sub_total.cents(),
            discount_cents: totals.discount_amount.cents(),
            tax_cents: totals.tax.cents(),
            shipping_fee_cents: totals.shipping_fee.cents(),
            total_cents: totals.total_amount.cents(),
            created_at: order.created_at(),
        }
    }
}

// -- Handlers --

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.orders.list_orders(&owner).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: one of the caller's orders.
#[tracing::instrument(skip(state))]
pub async fn get<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state.orders.get_order_for(&owner, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/status: move an order along its lifecycle.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state.orders.advance_status(order_id, req.status).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/cancel: cancel one of the caller's orders and return its stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    state.orders.get_order_for(&owner, order_id).await?;
    let order = state.orders.cancel_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/payment: record a payment outcome.
#[tracing::instrument(skip(state, req))]
pub async fn record_payment<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id, "order")?;
    let order = state.orders.record_payment(order_id, req.status).await?;
    Ok(Json(OrderResponse::from(&order)))
}
