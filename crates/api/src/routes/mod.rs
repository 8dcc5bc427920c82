//! HTTP handlers. Every response body is an [`Envelope`].

pub mod admin;
pub mod cart;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod payments;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use common::Envelope;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Header carrying the authenticated user. Authentication happens upstream.
pub const USER_HEADER: &str = "x-user-id";

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

/// The calling user, taken from [`USER_HEADER`].
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(|| ApiError::validation(format!("missing {USER_HEADER} header")))
    }
}

/// JSON body whose rejection is reported as a validation envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| ApiError::validation(e.body_text()))?;
        Ok(ApiJson(value))
    }
}
