//! Token issuance on responses and profile assembly.

use crate::api::effects::spawn_non_critical;
use crate::api::error::ApiError;
use crate::api::models::{Profile, User};
use crate::api::state::AppState;
use crate::api::store::Store;
use crate::api::tokens::TokenError;
use anyhow::Context;
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
use std::sync::Arc;
use tracing::debug;

pub const REFRESH_TOKEN_HEADER: &str = "x-ggwp-refresh-token";

/// Whether a refresh token is written next to the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issue {
    AccessOnly,
    AccessAndRefresh,
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .context("token is not a valid header value")
        .map_err(ApiError::from)
}

/// Sign tokens for `user` into response headers and bump its last-online
/// timestamp in the background.
///
/// # Errors
/// `Internal` when a token cannot be signed.
pub fn issue_tokens(state: &AppState, user: &User, issue: Issue) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();

    let access = state
        .tokens
        .issue_access(user.id, &user.user_admin_level)
        .with_context(|| format!("signing access token for user: {}", user.id))?;
    headers.insert(
        AUTHORIZATION,
        header_value(&format!("Bearer {}", access.token))?,
    );

    if issue == Issue::AccessAndRefresh {
        let refresh = state
            .tokens
            .issue_refresh(user.id)
            .with_context(|| format!("signing refresh token for user: {}", user.id))?;
        headers.insert(REFRESH_TOKEN_HEADER, header_value(&refresh.token)?);
    }

    let store = Arc::clone(&state.store);
    let user_id = user.id;
    spawn_non_critical("touch_last_online", async move {
        let mut tx = store.begin().await?;
        tx.touch_last_online(user_id).await?;
        tx.commit().await
    });

    Ok(headers)
}

/// Resolve the user id carried by the refresh token header.
///
/// # Errors
/// `Unauthenticated` for a missing, malformed or expired token.
pub fn refresh_user_id(state: &AppState, headers: &HeaderMap) -> Result<i64, ApiError> {
    let token = headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthenticated("missing refresh token".to_string()))?;

    match state.tokens.verify_refresh(token) {
        Ok(claims) => Ok(claims.user_id),
        Err(TokenError::Expired) => Err(ApiError::Unauthenticated(
            "refresh token has expired".to_string(),
        )),
        Err(err) => {
            debug!("Refresh token rejected: {}", err);
            Err(ApiError::Unauthenticated(
                "malformed refresh token".to_string(),
            ))
        }
    }
}

/// The user with progress, gradings, completed modules, goals and referral code.
///
/// # Errors
/// `NotFound` for an unknown user, `Internal` for store failures.
pub async fn load_profile(
    store: &dyn Store,
    user_id: i64,
    device_unique_id: &str,
) -> Result<Profile, ApiError> {
    let mut tx = store.begin().await.context("begin tx")?;

    let user = tx
        .user_by_id(user_id)
        .await
        .with_context(|| format!("getting user by id: {user_id}"))?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    let learning_progress = tx
        .learning_progress(Some(user_id), device_unique_id)
        .await
        .with_context(|| format!("getting user learning progresses by user id: {user_id}"))?;
    let quiz_gradings = tx
        .quiz_gradings(user_id)
        .await
        .with_context(|| format!("getting user quiz gradings by user id: {user_id}"))?;
    let completed_module_ids = tx
        .completed_module_ids(user_id)
        .await
        .with_context(|| format!("getting user completed module ids by user id: {user_id}"))?;
    let user_goals = tx
        .goals(user_id)
        .await
        .with_context(|| format!("getting user goals by user id: {user_id}"))?;
    let referral_code = tx
        .referral_code_by_user(user_id)
        .await
        .with_context(|| format!("getting user referral code by user id: {user_id}"))?;

    tx.rollback().await.context("closing profile transaction")?;

    Ok(Profile {
        user,
        learning_progress,
        quiz_gradings,
        completed_module_ids,
        user_goals,
        referral_code,
    })
}
