//! Operator endpoints: seeding the external collaborators and the
//! fulfilment transitions a merchant drives.

use axum::extract::{Path, Query, State};
use common::{Money, SkuSnapshot};
use inventory::Stock;
use order::{Order, Receiver};
use serde::Deserialize;

use super::{ApiJson, ApiResult, ok};
use crate::wiring::AppState;

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub available_count: u32,
}

#[derive(Deserialize)]
pub struct UpsertSkuRequest {
    pub product_id: String,
    pub product_title: String,
    #[serde(default)]
    pub product_image: String,
    pub sku_name: String,
    pub price: Money,
    #[serde(default = "on_sale_default")]
    pub on_sale: bool,
}

fn on_sale_default() -> bool {
    true
}

#[derive(Deserialize)]
pub struct CloseExpiredQuery {
    #[serde(default)]
    pub limit: usize,
}

/// PUT /admin/stock/{sku_id}
pub async fn set_stock(
    State(state): State<AppState>,
    Path(sku_id): Path<String>,
    ApiJson(req): ApiJson<SetStockRequest>,
) -> ApiResult<Stock> {
    ok(state.inventory.set_stock(&sku_id, req.available_count).await?)
}

/// PUT /admin/catalog/skus/{sku_id}
pub async fn upsert_sku(
    State(state): State<AppState>,
    Path(sku_id): Path<String>,
    ApiJson(req): ApiJson<UpsertSkuRequest>,
) -> ApiResult<SkuSnapshot> {
    let sku = SkuSnapshot {
        product_id: req.product_id,
        sku_id,
        product_title: req.product_title,
        product_image: req.product_image,
        sku_name: req.sku_name,
        price: req.price,
        on_sale: req.on_sale,
    };
    state.catalog.upsert(sku.clone());
    ok(sku)
}

/// PUT /admin/users/{user_id}/addresses/{address_id}
pub async fn put_address(
    State(state): State<AppState>,
    Path((user_id, address_id)): Path<(String, String)>,
    ApiJson(receiver): ApiJson<Receiver>,
) -> ApiResult<Receiver> {
    state.users.add_address(&user_id, &address_id, receiver.clone());
    ok(receiver)
}

/// POST /admin/orders/{order_no}/ship
pub async fn ship(State(state): State<AppState>, Path(order_no): Path<String>) -> ApiResult<Order> {
    ok(state.orders.ship_order(&order_no).await?)
}

/// POST /admin/orders/{order_no}/complete
pub async fn complete(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> ApiResult<Order> {
    ok(state.orders.complete_order(&order_no).await?)
}

/// POST /admin/orders/{order_no}/confirm-refund
pub async fn confirm_refund(
    State(state): State<AppState>,
    Path(order_no): Path<String>,
) -> ApiResult<Order> {
    ok(state.orders.confirm_refund(&order_no).await?)
}

/// POST /admin/payments/close-expired
pub async fn close_expired_payments(
    State(state): State<AppState>,
    Query(query): Query<CloseExpiredQuery>,
) -> ApiResult<usize> {
    ok(state.payments.close_expired(query.limit).await?)
}
