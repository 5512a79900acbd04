//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    /// No caller identity on the request.
    Unauthenticated,
    /// Checkout-core error.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg, "kind": "bad_request" }),
            ),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({
                    "error": "missing x-user-id or x-session-token header",
                    "kind": "unauthenticated",
                }),
            ),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": msg, "kind": "internal" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, serde_json::Value) {
    let status = status_for(&err);
    if err.is_fault() {
        tracing::error!(error = %err, kind = err.kind(), "request failed");
    }

    let mut body = serde_json::json!({ "error": err.to_string(), "kind": err.kind() });
    match &err {
        CheckoutError::InsufficientStock { shortfalls } => {
            body["shortfalls"] = serde_json::json!(shortfalls);
        }
        CheckoutError::CouponIneligible(reason) | CheckoutError::CouponNoLongerValid(reason) => {
            body["reason"] = serde_json::json!(reason.as_str());
        }
        CheckoutError::ProductUnavailable { product_id } => {
            body["product_id"] = serde_json::json!(product_id);
        }
        _ => {}
    }
    (status, body)
}

fn status_for(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
        CheckoutError::NotFound { .. } => StatusCode::NOT_FOUND,
        CheckoutError::CouponIneligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::ProductUnavailable { .. }
        | CheckoutError::InsufficientStock { .. }
        | CheckoutError::CouponNoLongerValid(_)
        | CheckoutError::Conflict { .. }
        | CheckoutError::Order(_) => StatusCode::CONFLICT,
        CheckoutError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        CheckoutError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}
