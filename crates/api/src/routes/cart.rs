//! Cart endpoints for the calling user.

use axum::extract::{Path, State};
use cart::{CartItem, CartSummary, CheckoutPreview};
use serde::{Deserialize, Serialize};

use super::{ApiJson, ApiResult, UserId, ok};
use crate::wiring::AppState;

#[derive(Deserialize)]
pub struct AddItemBody {
    pub sku_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateQuantityBody {
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct ItemIdsBody {
    pub item_ids: Vec<String>,
}

#[derive(Deserialize, Default)]
pub struct PreviewBody {
    #[serde(default)]
    pub item_ids: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct RemovedResponse {
    pub removed: usize,
}

/// GET /cart
pub async fn get(State(state): State<AppState>, UserId(user_id): UserId) -> ApiResult<Vec<CartItem>> {
    ok(state.cart.get_cart(&user_id).await?)
}

/// GET /cart/summary
pub async fn summary(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<CartSummary> {
    ok(state.cart.summary(&user_id).await?)
}

/// POST /cart/items
pub async fn add(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    ApiJson(body): ApiJson<AddItemBody>,
) -> ApiResult<CartItem> {
    ok(state
        .cart
        .add_item(&user_id, &body.sku_id, body.quantity)
        .await?)
}

/// PUT /cart/items/{item_id}
pub async fn update(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(item_id): Path<String>,
    ApiJson(body): ApiJson<UpdateQuantityBody>,
) -> ApiResult<CartItem> {
    ok(state
        .cart
        .update_quantity(&user_id, &item_id, body.quantity)
        .await?)
}

/// DELETE /cart/items/{item_id}
pub async fn remove(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(item_id): Path<String>,
) -> ApiResult<()> {
    state.cart.remove_item(&user_id, &item_id).await?;
    ok(())
}

/// POST /cart/items/remove
pub async fn remove_many(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    ApiJson(body): ApiJson<ItemIdsBody>,
) -> ApiResult<RemovedResponse> {
    let removed = state.cart.remove_items(&user_id, &body.item_ids).await?;
    ok(RemovedResponse { removed })
}

/// DELETE /cart
pub async fn clear(State(state): State<AppState>, UserId(user_id): UserId) -> ApiResult<()> {
    state.cart.clear(&user_id).await?;
    ok(())
}

/// POST /cart/refresh
pub async fn refresh(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Vec<CartItem>> {
    ok(state.cart.refresh(&user_id).await?)
}

/// POST /cart/checkout-preview
pub async fn checkout_preview(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    ApiJson(body): ApiJson<PreviewBody>,
) -> ApiResult<CheckoutPreview> {
    ok(state
        .cart
        .checkout_preview(&user_id, body.item_ids.as_deref())
        .await?)
}
