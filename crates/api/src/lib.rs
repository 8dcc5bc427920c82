//! HTTP bootstrap for the order lifecycle.
//!
//! Loads configuration, wires the inventory, order, payment and cart cores
//! (in memory, or over Postgres and Redis), runs their background tasks and
//! serves thin axum routes that wrap every result in an envelope.

pub mod adapters;
pub mod background;
pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;
pub mod wiring;

use std::any::Any;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use background::BackgroundTasks;
pub use config::Config;
pub use wiring::{AppState, BootstrapError, Stack};

/// Creates the router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // Inventory
        .route("/inventory/batch", post(routes::inventory::batch))
        .route("/inventory/deduct", post(routes::inventory::deduct))
        .route("/inventory/rollback", post(routes::inventory::rollback))
        .route("/inventory/{sku_id}", get(routes::inventory::get))
        // Orders
        .route("/orders/token", post(routes::orders::token))
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/{order_no}", get(routes::orders::get))
        .route("/orders/{order_no}/cancel", post(routes::orders::cancel))
        .route(
            "/orders/{order_no}/refund",
            post(routes::orders::request_refund),
        )
        // Payments
        .route("/payments/token", post(routes::payments::token))
        .route("/payments", post(routes::payments::create))
        .route(
            "/payments/callback/{channel}",
            post(routes::payments::callback),
        )
        .route("/payments/{payment_no}", get(routes::payments::get))
        .route(
            "/payments/{payment_no}/status",
            get(routes::payments::status),
        )
        // Cart
        .route(
            "/cart",
            get(routes::cart::get).delete(routes::cart::clear),
        )
        .route("/cart/summary", get(routes::cart::summary))
        .route("/cart/items", post(routes::cart::add))
        .route("/cart/items/remove", post(routes::cart::remove_many))
        .route(
            "/cart/items/{item_id}",
            put(routes::cart::update).delete(routes::cart::remove),
        )
        .route("/cart/refresh", post(routes::cart::refresh))
        .route(
            "/cart/checkout-preview",
            post(routes::cart::checkout_preview),
        )
        // Operator
        .route("/admin/stock/{sku_id}", put(routes::admin::set_stock))
        .route(
            "/admin/catalog/skus/{sku_id}",
            put(routes::admin::upsert_sku),
        )
        .route(
            "/admin/users/{user_id}/addresses/{address_id}",
            put(routes::admin::put_address),
        )
        .route("/admin/orders/{order_no}/ship", post(routes::admin::ship))
        .route(
            "/admin/orders/{order_no}/complete",
            post(routes::admin::complete),
        )
        .route(
            "/admin/orders/{order_no}/confirm-refund",
            post(routes::admin::confirm_refund),
        )
        .route(
            "/admin/payments/close-expired",
            post(routes::admin::close_expired_payments),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            CorsLayer::new()
                .allow_origin(AnyOrigin)
                .allow_methods(AnyOrigin)
                .allow_headers(AnyOrigin),
        )
        .layer(TraceLayer::new_for_http())
}

/// Turns a handler panic into an internal-error envelope.
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("handler panicked");
    let body = error::internal_envelope(&format!("panic: {detail}"));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
