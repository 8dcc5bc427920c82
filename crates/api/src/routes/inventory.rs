//! Stock reads plus the deduct/rollback surface peers call.

use std::collections::HashMap;

use axum::extract::{Path, State};
use inventory::{Stock, StockItem};
use serde::Deserialize;

use super::{ApiJson, ApiResult, ok};
use crate::error::ApiError;
use crate::wiring::AppState;

#[derive(Deserialize)]
pub struct BatchStockRequest {
    pub sku_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct StockChangeRequest {
    pub order_no: String,
    pub items: Vec<StockItem>,
}

/// GET /inventory/{sku_id}
pub async fn get(State(state): State<AppState>, Path(sku_id): Path<String>) -> ApiResult<Stock> {
    let stock = state
        .inventory
        .get_stock(&sku_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("stock for {sku_id} not found")))?;
    ok(stock)
}

/// POST /inventory/batch
pub async fn batch(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BatchStockRequest>,
) -> ApiResult<HashMap<String, Stock>> {
    ok(state.inventory.batch_get_stock(&req.sku_ids).await?)
}

/// POST /inventory/deduct
#[tracing::instrument(skip(state, req), fields(order_no = %req.order_no))]
pub async fn deduct(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StockChangeRequest>,
) -> ApiResult<()> {
    state.inventory.deduct(&req.order_no, &req.items).await?;
    ok(())
}

/// POST /inventory/rollback
#[tracing::instrument(skip(state, req), fields(order_no = %req.order_no))]
pub async fn rollback(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StockChangeRequest>,
) -> ApiResult<()> {
    state.inventory.rollback(&req.order_no, &req.items).await?;
    ok(())
}
