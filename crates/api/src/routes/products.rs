//! Catalog read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use domain::ProductSnapshot;
use serde::Serialize;
use store::RecordStore;

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub discount_price_cents: Option<i64>,
    pub effective_price_cents: i64,
    pub available_quantity: u32,
    pub is_active: bool,
}

impl From<ProductSnapshot> for ProductResponse {
    fn from(snapshot: ProductSnapshot) -> Self {
        Self {
            effective_price_cents: snapshot.effective_price().cents(),
            id: snapshot.product_id.to_string(),
            name: snapshot.name,
            price_cents: snapshot.price.cents(),
            discount_price_cents: snapshot.discount_price.map(|p| p.cents()),
            available_quantity: snapshot.available_quantity,
            is_active: snapshot.is_active,
        }
    }
}

/// GET /products: every sellable product.
#[tracing::instrument(skip(state))]
pub async fn list<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state.catalog.list_active().await?;
    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

/// GET /products/{id}: price and availability snapshot.
#[tracing::instrument(skip(state))]
pub async fn get<S: RecordStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let snapshot = state
        .catalog
        .get_product_snapshot(&ProductId::new(id))
        .await?;
    Ok(Json(ProductResponse::from(snapshot)))
}
