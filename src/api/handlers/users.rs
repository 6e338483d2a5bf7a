//! Account endpoints: sign-up, login, token refresh and the caller's profile.

use crate::api::context::{ApiJson, AuthUser, DeviceId};
use crate::api::error::{ApiError, ErrorBody};
use crate::api::identity::signup::{sign_up, PasswordSignup};
use crate::api::identity::verify_password;
use crate::api::models::{LearningProgress, NewAccount, Profile, QuizGrading, User};
use crate::api::response::{empty, message, Envelope, UserPayload};
use crate::api::session::{issue_tokens, load_profile, refresh_user_id, Issue};
use crate::api::state::AppState;
use crate::api::store::ProfileUpdate;
use anyhow::Context;
use axum::{extract::Extension, http::HeaderMap, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PlayerUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
}

/// Fields a user may change on itself. Absent or empty fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub about: Option<String>,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub phone: Option<i64>,
    pub location: Option<String>,
    pub sports: Option<String>,
    pub hashtags: Option<String>,
    pub player: Option<PlayerUpdate>,
}

impl From<UserUpdate> for ProfileUpdate {
    fn from(update: UserUpdate) -> Self {
        let player = update.player.unwrap_or_default();
        Self {
            email: update.email,
            about: update.about,
            date_of_birth: update.date_of_birth,
            phone: update.phone,
            location: update.location,
            sports: update.sports,
            hashtags: update.hashtags,
            first_name: player.first_name,
            last_name: player.last_name,
            gender: player.gender,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v0.1/user",
    request_body = PasswordSignup,
    responses(
        (status = 200, description = "Account created; tokens are in the response headers", body = NewAccount),
        (status = 400, description = "Missing attribute, bad email or email taken", body = ErrorBody),
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn create(
    state: Extension<Arc<AppState>>,
    ApiJson(request): ApiJson<PasswordSignup>,
) -> Result<impl IntoResponse, ApiError> {
    let account = sign_up(
        state.store.as_ref(),
        &request,
        state.auth.bcrypt_cost(),
        Utc::now(),
    )
    .await?;

    let headers = issue_tokens(&state, &account.user, Issue::AccessAndRefresh)?;

    Ok((headers, message(UserPayload { user: account })))
}

#[utoipa::path(
    post,
    path = "/api/v0.1/user/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Logged in; tokens are in the response headers", body = User),
        (status = 400, description = "Invalid password or email address", body = ErrorBody),
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    ApiJson(credentials): ApiJson<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let user = verify_password(tx.as_mut(), &credentials.email, &credentials.password).await?;
    tx.rollback().await.context("closing login transaction")?;

    let headers = issue_tokens(&state, &user, Issue::AccessAndRefresh)?;

    Ok((headers, message(UserPayload { user })))
}

#[utoipa::path(
    get,
    path = "/api/v0.1/user/token/refresh",
    params(
        ("X-Ggwp-Refresh-Token" = String, Header, description = "Refresh token"),
    ),
    responses(
        (status = 200, description = "New access token in the Authorization header", body = User),
        (status = 403, description = "Missing, malformed or expired refresh token", body = ErrorBody),
    ),
    tag = "user"
)]
#[instrument(skip_all)]
pub async fn refresh(
    state: Extension<Arc<AppState>>,
    request_headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = refresh_user_id(&state, &request_headers)?;

    let mut tx = state.store.begin().await.context("begin tx")?;
    let user = tx
        .user_by_id(user_id)
        .await
        .with_context(|| format!("getting user by id: {user_id}"))?
        .ok_or_else(|| ApiError::Unauthenticated("unknown user".to_string()))?;
    tx.rollback().await.context("closing refresh transaction")?;

    let headers = issue_tokens(&state, &user, Issue::AccessOnly)?;

    Ok((headers, message(UserPayload { user })))
}

#[utoipa::path(
    get,
    path = "/api/v0.1/user/self",
    responses(
        (status = 200, description = "Caller profile with progress, gradings and goals", body = Profile),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "user"
)]
pub async fn get_self(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    device: DeviceId,
) -> Result<Envelope<Profile>, ApiError> {
    let profile = load_profile(state.store.as_ref(), caller.user_id, device.as_str()).await?;
    Ok(message(profile))
}

#[utoipa::path(
    put,
    path = "/api/v0.1/user/self",
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Profile updated"),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "user"
)]
pub async fn update_self(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    ApiJson(update): ApiJson<UserUpdate>,
) -> Result<Envelope<()>, ApiError> {
    let update = ProfileUpdate::from(update);

    let mut tx = state.store.begin().await.context("begin tx")?;
    tx.update_profile(caller.user_id, &update)
        .await
        .context("updating user")?;
    tx.commit().await.context("committing")?;

    Ok(empty())
}

#[utoipa::path(
    get,
    path = "/api/v0.1/user/self/learning_progress",
    responses(
        (status = 200, description = "Progress recorded by the caller or its device", body = [LearningProgress]),
    ),
    tag = "user"
)]
pub async fn learning_progress(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    device: DeviceId,
) -> Result<Envelope<Vec<LearningProgress>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let progress = tx
        .learning_progress(Some(caller.user_id), device.as_str())
        .await
        .context("getting learning progress")?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(progress))
}

#[utoipa::path(
    get,
    path = "/api/v0.1/user/self/quizzes/gradings",
    responses(
        (status = 200, description = "Every graded answer of the caller", body = [QuizGrading]),
    ),
    tag = "user"
)]
pub async fn quiz_gradings(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Envelope<Vec<QuizGrading>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let gradings = tx
        .quiz_gradings(caller.user_id)
        .await
        .context("getting quiz gradings")?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(gradings))
}
