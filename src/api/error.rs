//! Error envelope returned by every handler.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Request},
    http::{header::CONTENT_LENGTH, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};
use utoipa::ToSchema;

pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Unimplemented(String),

    #[error("internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Conflict(_) | Self::Upstream(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        Self::invalid("invalid request")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!("Rejected query string: {}", rejection.body_text());
        Self::invalid("invalid request")
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub code: u16,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Internal(err) => error!("Request failed: {:#}", err),
            other => debug!("Request rejected ({}): {}", status, other),
        }

        let body = ErrorBody {
            request_id: None,
            code: status.as_u16(),
            message: self.to_string(),
        };

        let mut response = (status, Json(&body)).into_response();
        response.extensions_mut().insert(body);
        response
    }
}

/// Stamp error envelopes with the request id assigned by the request-id layer.
pub async fn attach_request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let response = next.run(request).await;

    let Some(request_id) = request_id else {
        return response;
    };
    let Some(body) = response.extensions().get::<ErrorBody>().cloned() else {
        return response;
    };

    let body = ErrorBody {
        request_id: Some(request_id),
        ..body
    };

    match serde_json::to_vec(&body) {
        Ok(bytes) => {
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            error!("Failed to encode error envelope: {}", err);
            response
        }
    }
}
