//! Order endpoints for the calling user.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use common::{Envelope, OrderType};
use order::{CreateOrderRequest, CreateOrderResult, Order, OrderLineRequest, OrderPage, OrderStatus, OrderToken};
use serde::Deserialize;

use super::{ApiJson, ApiResult, UserId, ok};
use crate::error::ApiError;
use crate::wiring::AppState;

#[derive(Deserialize)]
pub struct CreateOrderBody {
    pub token: String,
    pub items: Vec<OrderLineRequest>,
    pub address_id: String,
    #[serde(default)]
    pub buyer_remark: String,
    #[serde(default)]
    pub order_type: OrderType,
}

#[derive(Deserialize)]
pub struct ListQuery {
    /// Numeric status code.
    pub status: Option<i16>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
}

/// POST /orders/token
pub async fn token(State(state): State<AppState>, UserId(user_id): UserId) -> ApiResult<OrderToken> {
    ok(state.orders.generate_order_token(&user_id).await?)
}

/// POST /orders
#[tracing::instrument(skip(state, body), fields(user_id = %user_id))]
pub async fn create(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    ApiJson(body): ApiJson<CreateOrderBody>,
) -> Result<(StatusCode, Json<Envelope<CreateOrderResult>>), ApiError> {
    let result = state
        .orders
        .create_order(CreateOrderRequest {
            user_id,
            token: body.token,
            items: body.items,
            address_id: body.address_id,
            buyer_remark: body.buyer_remark,
            order_type: body.order_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(result))))
}

/// GET /orders
pub async fn list(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<ListQuery>,
) -> ApiResult<OrderPage> {
    let status = match query.status {
        Some(code) => Some(
            OrderStatus::from_code(code)
                .ok_or_else(|| ApiError::validation(format!("unknown order status {code}")))?,
        ),
        None => None,
    };
    ok(state
        .orders
        .list_orders(&user_id, status, query.page, query.size)
        .await?)
}

/// GET /orders/{order_no}
pub async fn get(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(order_no): Path<String>,
) -> ApiResult<Order> {
    ok(state.orders.get_order(&user_id, &order_no).await?)
}

/// POST /orders/{order_no}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(order_no): Path<String>,
) -> ApiResult<Order> {
    ok(state.orders.cancel_order(&user_id, &order_no).await?)
}

/// POST /orders/{order_no}/refund
pub async fn request_refund(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(order_no): Path<String>,
) -> ApiResult<Order> {
    ok(state.orders.request_refund(&user_id, &order_no).await?)
}
