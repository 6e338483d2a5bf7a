use crate::api::context::{ApiJson, AuthUser};
use crate::api::error::{ApiError, ErrorBody};
use crate::api::identity::recovery::{
    change_password, forgot_password, reset_password, ChangePassword, ForgotPassword,
    ResetPassword,
};
use crate::api::models::User;
use crate::api::response::{empty, message, Envelope, UserPayload};
use crate::api::session::{issue_tokens, Issue};
use crate::api::state::AppState;
use axum::{extract::Extension, response::IntoResponse};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/api/v0.1/user/password/forgotten",
    request_body = ForgotPassword,
    responses(
        (status = 200, description = "Reset token mailed when the address has an account"),
    ),
    tag = "password"
)]
#[instrument(skip_all)]
pub async fn forgotten(
    state: Extension<Arc<AppState>>,
    ApiJson(request): ApiJson<ForgotPassword>,
) -> Result<Envelope<()>, ApiError> {
    forgot_password(
        state.store.as_ref(),
        state.mailer.as_ref(),
        state.auth.mail_timeout(),
        &request,
        state.auth.reset_ttl(),
        Utc::now(),
    )
    .await?;

    Ok(empty())
}

#[utoipa::path(
    post,
    path = "/api/v0.1/user/password/reset",
    request_body = ResetPassword,
    responses(
        (status = 200, description = "Password replaced; tokens are in the response headers", body = User),
        (status = 400, description = "Unknown user, unknown or expired token", body = ErrorBody),
    ),
    tag = "password"
)]
#[instrument(skip_all)]
pub async fn reset(
    state: Extension<Arc<AppState>>,
    ApiJson(request): ApiJson<ResetPassword>,
) -> Result<impl IntoResponse, ApiError> {
    let user = reset_password(
        state.store.as_ref(),
        &request,
        state.auth.bcrypt_cost(),
        state.auth.reset_ttl(),
        Utc::now(),
    )
    .await?;

    let headers = issue_tokens(&state, &user, Issue::AccessAndRefresh)?;

    Ok((headers, message(UserPayload { user })))
}

#[utoipa::path(
    put,
    path = "/api/v0.1/user/self/password",
    request_body = ChangePassword,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Wrong current password", body = ErrorBody),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "password"
)]
#[instrument(skip_all, fields(user_id = caller.user_id))]
pub async fn change(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    ApiJson(request): ApiJson<ChangePassword>,
) -> Result<Envelope<()>, ApiError> {
    change_password(
        state.store.as_ref(),
        caller.user_id,
        &request,
        state.auth.bcrypt_cost(),
    )
    .await?;

    Ok(empty())
}
