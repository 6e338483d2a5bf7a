use crate::api::codes::waitlist_code;
use crate::api::context::ApiJson;
use crate::api::error::{ApiError, ErrorBody};
use crate::api::identity::signup::EMAIL_EXISTS;
use crate::api::identity::{normalize_email, valid_email};
use crate::api::models::WaitlistItem;
use crate::api::response::{message, Envelope};
use crate::api::state::AppState;
use crate::api::store::{NewWaitlistItem, WaitlistOutcome};
use anyhow::Context;
use axum::extract::Extension;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WaitlistRequest {
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub original_referral_code: String,
    #[serde(default)]
    pub original_waitlist_code: String,
}

#[utoipa::path(
    get,
    path = "/api/v0.1/waitlist",
    responses(
        (status = 200, description = "Waitlist entries with their codes, without email addresses", body = [WaitlistItem]),
    ),
    tag = "waitlist"
)]
pub async fn list(state: Extension<Arc<AppState>>) -> Result<Envelope<Vec<WaitlistItem>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let items = tx.waitlist().await.context("getting waitlist")?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(items))
}

#[utoipa::path(
    post,
    path = "/api/v0.1/waitlist/user",
    request_body = WaitlistRequest,
    responses(
        (status = 200, description = "Joined the waitlist", body = WaitlistItem),
        (status = 400, description = "Bad email, registered user, unknown code or already waiting", body = ErrorBody),
    ),
    tag = "waitlist"
)]
#[instrument(skip_all)]
pub async fn join(
    state: Extension<Arc<AppState>>,
    ApiJson(request): ApiJson<WaitlistRequest>,
) -> Result<Envelope<WaitlistItem>, ApiError> {
    let email = normalize_email(&request.email_address);
    if email.is_empty() {
        return Err(ApiError::invalid("missing email address"));
    }
    if !valid_email(&email) {
        return Err(ApiError::invalid("invalid email address"));
    }

    let mut tx = state.store.begin().await.context("begin tx")?;

    if tx
        .user_by_email(&email)
        .await
        .context("checking user by email")?
        .is_some()
    {
        return Err(ApiError::invalid(EMAIL_EXISTS));
    }

    let owner_waitlist_code = waitlist_code().context("generating waitlist code")?;

    let original_waitlist_code = request.original_waitlist_code.trim();
    let original_waitlist_code_id = if original_waitlist_code.is_empty() {
        None
    } else {
        let item = tx
            .waitlist_item_by_code(original_waitlist_code)
            .await
            .with_context(|| {
                format!("getting waitlist item by code: {original_waitlist_code}")
            })?
            .ok_or_else(|| ApiError::invalid("waitlist code provided does not exist"))?;
        Some(item.id)
    };

    let original_referral_code = request.original_referral_code.trim();
    let original_referral_code_id = if original_referral_code.is_empty() {
        None
    } else {
        let code = tx
            .referral_code_by_code(original_referral_code)
            .await
            .with_context(|| format!("getting referral code by code: {original_referral_code}"))?
            .ok_or_else(|| ApiError::invalid("referral code provided does not exist"))?;
        Some(code.id)
    };

    let new_item = NewWaitlistItem {
        email_address: email,
        owner_waitlist_code,
        original_referral_code_id,
        original_waitlist_code_id,
    };

    let item = match tx
        .create_waitlist_item(&new_item)
        .await
        .context("creating waitlist item")?
    {
        WaitlistOutcome::Created(item) => item,
        WaitlistOutcome::Duplicate => {
            return Err(ApiError::Conflict("email already in waitlist".to_string()))
        }
    };

    tx.commit().await.context("committing waitlist tx")?;

    info!(waitlist_item_id = item.id, "Joined waitlist");

    Ok(message(item))
}
