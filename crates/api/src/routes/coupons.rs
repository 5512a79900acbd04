//! Coupon preview endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::Money;
use serde::{Deserialize, Serialize};
use store::RecordStore;

use super::AppState;
use crate::error::ApiError;
use crate::identity::Caller;

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub code: String,
    pub subtotal_cents: i64,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub code: String,
    pub applicable: bool,
    pub discount_cents: i64,
    pub reason: Option<&'static str>,
    pub message: Option<String>,
}

/// POST /coupons/validate: preview a coupon against a subtotal without a cart.
///
/// Never consumes the coupon. Rejections come back as `applicable: false`.
#[tracing::instrument(skip(state, req))]
pub async fn validate<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Caller(owner): Caller,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    if req.subtotal_cents < 0 {
        return Err(ApiError::BadRequest(
            "subtotal_cents must not be negative".to_string(),
        ));
    }
    let result = state
        .coupons
        .validate(&req.code, Money::from_cents(req.subtotal_cents), &owner)
        .await?;

    Ok(Json(ValidateResponse {
        code: result.code,
        applicable: result.applicable,
        discount_cents: result.discount_amount.cents(),
        reason: result.reason.map(|r| r.as_str()),
        message: result.reason.map(|r| r.to_string()),
    }))
}
