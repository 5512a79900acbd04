//! Cart and checkout endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use checkout::CheckoutDetails;
use common::{CartItemId, Owner, ProductId, SessionToken};
use domain::{Cart, ItemOptions};
use serde::{Deserialize, Serialize};
use store::RecordStore;

use super::orders::OrderResponse;
use super::{AppState, parse_id};
use crate::error::ApiError;
use crate::identity::Caller;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct MergeRequest {
    pub session_token: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub id: String,
    pub owner: String,
    pub items: Vec<CartItemResponse>,
    pub coupon: Option<AppliedCouponResponse>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_fee_cents: i64,
    pub grand_total_cents: i64,
    pub item_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub discount_price_cents: Option<i64>,
    pub total_cents: i64,
    pub options: ItemOptions,
}

#[derive(Serialize)]
pub struct AppliedCouponResponse {
    pub code: String,
    pub discount_cents: i64,
}

impl From<&Cart> for CartResponse {
    fn from(cart: &Cart) -> Self {
        let totals = cart.totals();
        Self {
            id: cart.id().to_string(),
            owner: cart.owner().key(),
            items: cart
                .items()
                .iter()
                .map(|item| CartItemResponse {
                    id: item.id.to_string(),
                    product_id: item.product_id.to_string(),
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                    discount_price_cents: item.discount_price.map(|p| p.cents()),
                    total_cents: item.total_price().cents(),
                    options: item.options.clone(),
                })
                .collect(),
            coupon: cart.coupon().map(|c| AppliedCouponResponse {
                code: c.code.clone(),
                discount_cents: totals.discount_amount.cents(),
            }),
            subtotal_cents: totals.subtotal.cents(),
            discount_cents: totals.discount_amount.cents(),
            shipping_fee_cents: totals.shipping_fee.cents(),
            grand_total_cents: totals.grand_total.cents(),
            item_count: totals.item_count,
            expires_at: cart.expires_at(),
        }
    }
}

// -- Handlers --

/// GET /cart: the caller's cart with totals.
#[tracing::instrument(skip(state))]
pub async fn get<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.get_cart(&owner).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /cart: remove every line and the coupon.
#[tracing::instrument(skip(state))]
pub async fn clear<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.clear(&owner).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /cart/items: add a product at its current price.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartResponse>), ApiError> {
    let cart = state
        .carts
        .add_item(
            &owner,
            &ProductId::new(req.product_id),
            req.quantity,
            ItemOptions::from(req.options),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(CartResponse::from(&cart))))
}

/// PUT /cart/items/{id}: change a line's quantity.
#[tracing::instrument(skip(state, req))]
pub async fn update_item<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let item_id: CartItemId = parse_id(&id, "cart item")?;
    let cart = state
        .carts
        .update_item_quantity(&owner, item_id, req.quantity)
        .await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /cart/items/{id}: remove a line.
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let item_id: CartItemId = parse_id(&id, "cart item")?;
    let cart = state.carts.remove_item(&owner, item_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /cart/coupon: preview and attach a coupon.
#[tracing::instrument(skip(state, req))]
pub async fn apply_coupon<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.apply_coupon(&owner, &req.code).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// DELETE /cart/coupon: detach the coupon.
#[tracing::instrument(skip(state))]
pub async fn remove_coupon<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.carts.remove_coupon(&owner).await?;
    Ok(Json(CartResponse::from(&cart)))
}

/// POST /cart/checkout: place an order from the cart.
#[tracing::instrument(skip(state, details))]
pub async fn checkout<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Json(details): Json<CheckoutDetails>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.checkout.checkout(&owner, details).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// POST /cart/merge: fold an anonymous session cart into the user's cart.
#[tracing::instrument(skip(state, req))]
pub async fn merge<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Json(req): Json<MergeRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let Owner::User(user_id) = owner else {
        return Err(ApiError::BadRequest(
            "merging requires an authenticated user".to_string(),
        ));
    };
    if req.session_token.trim().is_empty() {
        return Err(ApiError::BadRequest("session_token is empty".to_string()));
    }
    let session = SessionToken::new(req.session_token.trim());
    let cart = state.carts.merge_session_cart(&session, user_id).await?;
    Ok(Json(CartResponse::from(&cart)))
}
