//! API error type with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{Envelope, ErrorKind};

const INTERNAL_MESSAGE: &str = "internal error, please retry later";

/// Any failure a handler returns, reduced to its kind and message.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.kind)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict
        | ErrorKind::InsufficientStock
        | ErrorKind::StaleState
        | ErrorKind::RetryClient => StatusCode::CONFLICT,
        ErrorKind::Busy => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Envelope for an internal failure: the caller only sees a trace id that
/// matches the error log line.
pub fn internal_envelope(detail: &str) -> Envelope<()> {
    let trace_id = uuid::Uuid::new_v4();
    tracing::error!(%trace_id, error = %detail, "internal server error");
    Envelope::error(
        ErrorKind::Internal,
        format!("{INTERNAL_MESSAGE} (trace id {trace_id})"),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.kind {
            ErrorKind::Internal => internal_envelope(&self.message),
            ErrorKind::Upstream => {
                tracing::warn!(error = %self.message, "upstream failure");
                Envelope::error(self.kind, "a dependent service is unavailable")
            }
            kind => {
                tracing::debug!(kind = %kind, error = %self.message, "request rejected");
                Envelope::error(kind, self.message)
            }
        };
        (status, Json(body)).into_response()
    }
}

macro_rules! from_crate_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ApiError {
                fn from(err: $ty) -> Self {
                    ApiError::new(err.kind(), err.to_string())
                }
            }
        )*
    };
}

from_crate_error!(
    inventory::InventoryError,
    order::OrderError,
    payment::PaymentError,
    cart::CartError,
);
