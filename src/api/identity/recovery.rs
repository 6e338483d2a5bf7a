//! Password change, forgot-password and reset.

use super::{hash_password, normalize_email, password_matches};
use crate::api::codes::reset_token;
use crate::api::error::ApiError;
use crate::api::mailer::{forgot_password_message, send_with_timeout, Mailer};
use crate::api::models::User;
use crate::api::store::Store;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ForgotPassword {
    #[serde(default)]
    pub email_address: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ResetPassword {
    #[serde(default, rename = "password_reset_token")]
    pub token: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChangePassword {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

/// Mail a reset token to the account owner, reusing one that is still active.
///
/// Unknown addresses succeed silently so the endpoint does not reveal which
/// e-mails have accounts.
///
/// # Errors
/// `Internal` when the store or the mail delivery fails.
pub async fn forgot_password(
    store: &dyn Store,
    mailer: &dyn Mailer,
    mail_timeout: std::time::Duration,
    request: &ForgotPassword,
    reset_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let email = normalize_email(&request.email_address);
    let mut tx = store.begin().await.context("begin tx")?;

    let Some(user) = tx.user_by_email(&email).await.context("getting user by email")? else {
        debug!("Forgot password for an unknown email address");
        return Ok(());
    };

    let active = tx
        .password_resets(user.id)
        .await
        .context("checking for existing password reset tokens")?
        .into_iter()
        .find(|reset| reset.is_active_at(now, reset_ttl));

    let token = match active {
        Some(reset) => reset.token,
        None => {
            let token = reset_token().context("unable to generate password reset token")?;
            tx.create_password_reset(user.id, &token)
                .await
                .context("unable to create password reset token")?;
            token
        }
    };

    tx.commit().await.context("committing password reset token")?;

    send_with_timeout(
        mailer,
        &forgot_password_message(&user.email, &token),
        mail_timeout,
    )
    .await?;

    info!(user_id = user.id, "Password reset token sent");

    Ok(())
}

/// Consume a reset token and set the new password.
///
/// # Errors
/// `InvalidInput` for unknown accounts, unknown or expired tokens.
pub async fn reset_password(
    store: &dyn Store,
    request: &ResetPassword,
    bcrypt_cost: u32,
    reset_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<User, ApiError> {
    if request.new_password.is_empty() {
        return Err(ApiError::invalid("missing attribute: new_password"));
    }

    let email = normalize_email(&request.email_address);
    let mut tx = store.begin().await.context("begin tx")?;

    let user = tx
        .user_by_email(&email)
        .await
        .context("getting user by email")?
        .ok_or_else(|| ApiError::invalid("missing user email"))?;

    let reset = tx
        .password_reset(user.id, request.token.trim())
        .await
        .context("unable to get password reset")?
        .ok_or_else(|| ApiError::invalid("unknown password reset token"))?;

    if !reset.is_active_at(now, reset_ttl) {
        return Err(ApiError::invalid("reset token has expired"));
    }

    let password_hash = hash_password(&request.new_password, bcrypt_cost).await?;
    tx.update_password(user.id, &password_hash)
        .await
        .context("updating user password")?;

    tx.commit().await.context("committing password reset")?;

    info!(user_id = user.id, "Password reset");

    Ok(user)
}

/// # Errors
/// `InvalidInput` when the current password does not match.
pub async fn change_password(
    store: &dyn Store,
    user_id: i64,
    request: &ChangePassword,
    bcrypt_cost: u32,
) -> Result<(), ApiError> {
    if request.new_password.is_empty() {
        return Err(ApiError::invalid("missing attribute: new_password"));
    }

    let mut tx = store.begin().await.context("begin tx")?;

    let user = tx
        .user_by_id(user_id)
        .await
        .with_context(|| format!("getting user by id: {user_id}"))?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    let current_matches = match user.password_hash.as_deref() {
        Some(hash) if !hash.is_empty() => {
            password_matches(&request.current_password, hash).await?
        }
        _ => false,
    };
    if !current_matches {
        return Err(ApiError::invalid("wrong current password"));
    }

    let password_hash = hash_password(&request.new_password, bcrypt_cost).await?;
    tx.update_password(user_id, &password_hash)
        .await
        .context("updating user password")?;

    tx.commit().await.context("committing password change")?;

    Ok(())
}
