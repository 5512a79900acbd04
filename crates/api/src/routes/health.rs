//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use checkout::CheckoutError;
use common::ProductId;
use serde::Serialize;
use store::RecordStore;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
}

/// GET /health: reports whether the record store answers reads.
pub async fn check<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    // Any answer other than a storage fault means the store is reachable
    let probe = state
        .catalog
        .get_product_snapshot(&ProductId::new("health-probe"))
        .await;
    match probe {
        Ok(_) | Err(CheckoutError::NotFound { .. }) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                store: "up",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    store: "down",
                }),
            )
        }
    }
}
