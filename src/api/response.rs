//! Success envelope: `{"message": <payload>}`, or `{}` without a payload.

use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<T>,
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[must_use]
pub fn message<T: Serialize>(payload: T) -> Envelope<T> {
    Envelope {
        message: Some(payload),
    }
}

#[must_use]
pub fn empty() -> Envelope<()> {
    Envelope { message: None }
}

/// Payload of the account endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserPayload<T> {
    pub user: T,
}
