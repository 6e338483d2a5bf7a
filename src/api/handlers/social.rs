use crate::api::context::ApiQuery;
use crate::api::error::{ApiError, ErrorBody};
use crate::api::identity::signup::{social_login, social_sign_up};
use crate::api::identity::{social_assertion, SocialFlow};
use crate::api::models::{NewAccount, SocialNetwork, User};
use crate::api::response::{message, UserPayload};
use crate::api::session::{issue_tokens, Issue};
use crate::api::state::AppState;
use axum::{extract::Extension, response::IntoResponse};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::IntoParams;

/// Provider credentials passed on the query string.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SocialQuery {
    #[serde(default)]
    pub access_token: String,
    pub access_secret: Option<String>,
    #[serde(default)]
    pub social_network: String,
}

impl SocialQuery {
    fn network(&self) -> SocialNetwork {
        SocialNetwork::parse_lenient(&self.social_network)
    }
}

#[utoipa::path(
    post,
    path = "/api/v0.1/user/social/login",
    params(SocialQuery),
    responses(
        (status = 200, description = "Logged in; tokens are in the response headers", body = User),
        (status = 400, description = "Unsupported network, bad credentials or unknown email", body = ErrorBody),
        (status = 501, description = "Provider not configured", body = ErrorBody),
    ),
    tag = "social"
)]
#[instrument(skip_all, fields(network = %query.social_network))]
pub async fn login(
    state: Extension<Arc<AppState>>,
    ApiQuery(query): ApiQuery<SocialQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let assertion = social_assertion(
        SocialFlow::Login,
        query.network(),
        &query.access_token,
        query.access_secret.as_deref(),
    )?;

    let user = social_login(state.store.as_ref(), &state.social, &assertion).await?;

    let headers = issue_tokens(&state, &user, Issue::AccessAndRefresh)?;

    Ok((headers, message(UserPayload { user })))
}

#[utoipa::path(
    post,
    path = "/api/v0.1/user/social/signup",
    params(SocialQuery),
    responses(
        (status = 200, description = "Account created; tokens are in the response headers", body = NewAccount),
        (status = 400, description = "Unsupported network, bad credentials or email taken", body = ErrorBody),
        (status = 501, description = "Provider not configured", body = ErrorBody),
    ),
    tag = "social"
)]
#[instrument(skip_all, fields(network = %query.social_network))]
pub async fn sign_up(
    state: Extension<Arc<AppState>>,
    ApiQuery(query): ApiQuery<SocialQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let assertion = social_assertion(
        SocialFlow::SignUp,
        query.network(),
        &query.access_token,
        query.access_secret.as_deref(),
    )?;

    let account = social_sign_up(
        state.store.as_ref(),
        &state.social,
        &assertion,
        state.auth.bcrypt_cost(),
    )
    .await?;

    let headers = issue_tokens(&state, &account.user, Issue::AccessAndRefresh)?;

    Ok((headers, message(UserPayload { user: account })))
}
