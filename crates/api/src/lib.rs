//! HTTP API server for the storefront checkout.
//!
//! Provides REST endpoints for carts, checkout, orders, coupon previews and
//! catalog reads, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use store::RecordStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: RecordStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/cart",
            get(routes::cart::get::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/items", post(routes::cart::add_item::<S>))
        .route(
            "/cart/items/{id}",
            put(routes::cart::update_item::<S>).delete(routes::cart::remove_item::<S>),
        )
        .route(
            "/cart/coupon",
            post(routes::cart::apply_coupon::<S>).delete(routes::cart::remove_coupon::<S>),
        )
        .route("/cart/checkout", post(routes::cart::checkout::<S>))
        .route("/cart/merge", post(routes::cart::merge::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/status",
            post(routes::orders::update_status::<S>),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{id}/payment",
            post(routes::orders::record_payment::<S>),
        )
        .route("/coupons/validate", post(routes::coupons::validate::<S>))
        .route("/products", get(routes::products::list::<S>))
        .route("/products/{id}", get(routes::products::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over a record store.
pub fn create_default_state<S: RecordStore + Clone + 'static>(
    store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    Arc::new(AppState::new(store, config.checkout.clone()))
}
