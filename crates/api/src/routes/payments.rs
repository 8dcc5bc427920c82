//! Payment endpoints, including the channel callback.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::Envelope;
use payment::{
    CallbackOutcome, CallbackRequest, CreatePaymentRequest, CreatePaymentResult, Payment,
    PaymentChannel, PaymentStatus, PaymentToken,
};
use serde::{Deserialize, Serialize};

use super::{ApiJson, ApiResult, UserId, ok};
use crate::error::ApiError;
use crate::wiring::AppState;

#[derive(Deserialize)]
pub struct TokenBody {
    pub order_no: String,
}

#[derive(Deserialize)]
pub struct CreatePaymentBody {
    pub order_no: String,
    pub token: String,
    pub channel: PaymentChannel,
    #[serde(default)]
    pub return_url: String,
}

#[derive(Serialize)]
pub struct PaymentStatusResponse {
    pub payment_no: String,
    pub status: PaymentStatus,
    pub trade_no: Option<String>,
}

/// POST /payments/token
pub async fn token(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    ApiJson(body): ApiJson<TokenBody>,
) -> ApiResult<PaymentToken> {
    ok(state
        .payments
        .generate_payment_token(&user_id, &body.order_no)
        .await?)
}

/// POST /payments
#[tracing::instrument(skip(state, body), fields(user_id = %user_id, order_no = %body.order_no))]
pub async fn create(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    ApiJson(body): ApiJson<CreatePaymentBody>,
) -> Result<(StatusCode, Json<Envelope<CreatePaymentResult>>), ApiError> {
    let result = state
        .payments
        .create_payment(CreatePaymentRequest {
            user_id,
            order_no: body.order_no,
            token: body.token,
            channel: body.channel,
            return_url: body.return_url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(result))))
}

/// GET /payments/{payment_no}
pub async fn get(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(payment_no): Path<String>,
) -> ApiResult<Payment> {
    ok(state.payments.get_payment(&user_id, &payment_no).await?)
}

/// GET /payments/{payment_no}/status
pub async fn status(
    State(state): State<AppState>,
    Path(payment_no): Path<String>,
) -> ApiResult<PaymentStatusResponse> {
    let (status, trade_no) = state.payments.query_payment(&payment_no).await?;
    ok(PaymentStatusResponse {
        payment_no,
        status,
        trade_no,
    })
}

/// POST /payments/callback/{channel}
///
/// The path names the channel; it overrides whatever the body claims.
#[tracing::instrument(skip(state, callback), fields(payment_no = %callback.payment_no))]
pub async fn callback(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    ApiJson(mut callback): ApiJson<CallbackRequest>,
) -> ApiResult<CallbackOutcome> {
    let channel = PaymentChannel::parse(&channel)
        .ok_or_else(|| ApiError::validation(format!("unknown channel {channel}")))?;
    callback.channel = channel.as_str().to_string();
    ok(state.payments.handle_callback(callback).await?)
}
