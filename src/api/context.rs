//! Request-scoped extractors.
//!
//! `RequestContext` and `DeviceId` never reject. `AuthUser` resolves the bearer
//! access token and `AdminUser` additionally requires an admin account.
//! `ApiJson`/`ApiQuery` turn body and query rejections into [`ApiError`].

use crate::api::error::{ApiError, REQUEST_ID_HEADER};
use crate::api::models::User;
use crate::api::state::AppState;
use crate::api::tokens::TokenError;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

pub const DEVICE_ID_HEADER: &str = "X-GGWP-Device-Unique-Id";

/// JSON body extractor answering malformed input with `invalid request`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor answering malformed input with `invalid request`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Value of the device header; blank counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceId(pub Option<String>);

impl DeviceId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for DeviceId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let device = parts
            .headers
            .get(DEVICE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        Ok(Self(device))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub device: DeviceId,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let device = DeviceId::from_request_parts(parts, state).await?;

        Ok(Self { request_id, device })
    }
}

pub(crate) fn app_state(parts: &Parts) -> Result<Arc<AppState>, ApiError> {
    parts
        .extensions
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal(anyhow!("application state is not installed")))
}

/// Caller identified by a valid access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub user_type: String,
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::Unauthenticated("missing auth token".to_string()))?;

    let malformed = || ApiError::Unauthenticated("invalid/malformed auth token".to_string());
    let value = header.to_str().map_err(|_| malformed())?;
    if value.is_empty() {
        return Err(ApiError::Unauthenticated("missing auth token".to_string()));
    }

    match value.split(' ').collect::<Vec<_>>().as_slice() {
        [_, token] => Ok(*token),
        _ => Err(malformed()),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = app_state(parts)?;
        let token = bearer_token(parts)?;

        let claims = state.tokens.verify_access(token).map_err(|err| match err {
            TokenError::Expired => ApiError::Unauthenticated("auth token has expired".to_string()),
            other => {
                debug!("Access token rejected: {}", other);
                ApiError::Unauthenticated("malformed auth token".to_string())
            }
        })?;

        Ok(Self {
            user_id: claims.user_id,
            user_type: claims.user_type,
        })
    }
}

/// Authenticated caller whose account carries the admin level.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = AuthUser::from_request_parts(parts, state).await?;
        let app = app_state(parts)?;

        let mut tx = app.store.begin().await.context("begin tx")?;
        let user = tx
            .user_by_id(caller.user_id)
            .await
            .with_context(|| format!("getting user by id: {}", caller.user_id))?
            .ok_or_else(|| ApiError::Forbidden("unknown user".to_string()))?;
        tx.rollback().await.context("closing read transaction")?;

        if user.is_admin() {
            Ok(Self(user))
        } else {
            Err(ApiError::Forbidden("admin access required".to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn device_id_blank_is_absent() {
        let mut blank = parts(&[(DEVICE_ID_HEADER, "  ")]);
        let device = DeviceId::from_request_parts(&mut blank, &()).await.unwrap();
        assert_eq!(device, DeviceId(None));

        let mut set = parts(&[("x-ggwp-device-unique-id", "phone-1")]);
        let device = DeviceId::from_request_parts(&mut set, &()).await.unwrap();
        assert_eq!(device.as_str(), "phone-1");
    }

    #[tokio::test]
    async fn context_carries_request_id() {
        let mut parts = parts(&[("x-request-id", "01HZX"), (DEVICE_ID_HEADER, "tablet")]);
        let context = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(context.request_id.as_deref(), Some("01HZX"));
        assert_eq!(context.device.as_str(), "tablet");
    }

    #[test]
    fn bearer_token_shapes() {
        assert_eq!(
            bearer_token(&parts(&[])).unwrap_err().to_string(),
            "missing auth token"
        );
        assert_eq!(
            bearer_token(&parts(&[("authorization", "Bearer")]))
                .unwrap_err()
                .to_string(),
            "invalid/malformed auth token"
        );
        assert_eq!(
            bearer_token(&parts(&[("authorization", "Bearer a b")]))
                .unwrap_err()
                .to_string(),
            "invalid/malformed auth token"
        );
        assert_eq!(
            bearer_token(&parts(&[("authorization", "Bearer abc")])).unwrap(),
            "abc"
        );
    }
}
