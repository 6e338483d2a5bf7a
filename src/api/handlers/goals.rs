use crate::api::context::{ApiJson, AuthUser};
use crate::api::error::{ApiError, ErrorBody};
use crate::api::models::{GoalTemplate, UserGoal};
use crate::api::response::{empty, message, Envelope};
use crate::api::state::AppState;
use crate::api::store::NewGoal;
use anyhow::Context;
use axum::extract::{Extension, Path};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GoalRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub value: f64,
    pub rate: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

impl GoalRequest {
    fn into_new_goal(self) -> Result<NewGoal, ApiError> {
        let description = self.description.trim();
        if description.is_empty() {
            return Err(ApiError::invalid("missing attribute: description"));
        }

        Ok(NewGoal {
            description: description.to_string(),
            value: self.value,
            rate: self.rate.filter(|rate| !rate.trim().is_empty()),
            deadline: self.deadline,
        })
    }
}

#[utoipa::path(
    get,
    path = "/api/v0.1/user/self/goals",
    responses(
        (status = 200, description = "Goals of the caller", body = [UserGoal]),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "goals"
)]
pub async fn list(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Envelope<Vec<UserGoal>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let goals = tx
        .goals(caller.user_id)
        .await
        .with_context(|| format!("getting goals of user: {}", caller.user_id))?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(goals))
}

#[utoipa::path(
    post,
    path = "/api/v0.1/user/self/goals",
    request_body = GoalRequest,
    responses(
        (status = 200, description = "Goal created"),
        (status = 400, description = "Missing description", body = ErrorBody),
    ),
    tag = "goals"
)]
#[instrument(skip_all, fields(user_id = caller.user_id))]
pub async fn create(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    ApiJson(request): ApiJson<GoalRequest>,
) -> Result<Envelope<()>, ApiError> {
    let goal = request.into_new_goal()?;

    let mut tx = state.store.begin().await.context("begin tx")?;
    let created = tx
        .create_goal(caller.user_id, &goal)
        .await
        .context("creating goal")?;
    tx.commit().await.context("committing")?;

    info!(goal_id = created.id, "Goal created");

    Ok(empty())
}

async fn set_completed(
    state: &AppState,
    user_id: i64,
    goal_id: i64,
    completed: bool,
) -> Result<Envelope<()>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let updated = tx
        .set_goal_completed(user_id, goal_id, completed)
        .await
        .with_context(|| format!("updating goal: {goal_id}"))?;
    if !updated {
        tx.rollback().await.context("rolling back")?;
        return Err(ApiError::NotFound(format!("goal not found: {goal_id}")));
    }
    tx.commit().await.context("committing")?;

    Ok(empty())
}

#[utoipa::path(
    put,
    path = "/api/v0.1/user/self/goals/{id}/complete",
    params(("id" = i64, Path, description = "Goal id")),
    responses(
        (status = 200, description = "Goal marked complete"),
        (status = 404, description = "Goal does not belong to the caller", body = ErrorBody),
    ),
    tag = "goals"
)]
pub async fn complete(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    Path(goal_id): Path<i64>,
) -> Result<Envelope<()>, ApiError> {
    set_completed(&state, caller.user_id, goal_id, true).await
}

#[utoipa::path(
    put,
    path = "/api/v0.1/user/self/goals/{id}/incomplete",
    params(("id" = i64, Path, description = "Goal id")),
    responses(
        (status = 200, description = "Goal marked incomplete"),
        (status = 404, description = "Goal does not belong to the caller", body = ErrorBody),
    ),
    tag = "goals"
)]
pub async fn incomplete(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    Path(goal_id): Path<i64>,
) -> Result<Envelope<()>, ApiError> {
    set_completed(&state, caller.user_id, goal_id, false).await
}

#[utoipa::path(
    get,
    path = "/api/v0.1/user/goals/templates",
    responses(
        (status = 200, description = "Active goal templates", body = [GoalTemplate]),
    ),
    tag = "goals"
)]
pub async fn templates(
    state: Extension<Arc<AppState>>,
    _caller: AuthUser,
) -> Result<Envelope<Vec<GoalTemplate>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let templates = tx.goal_templates().await.context("getting goal templates")?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(templates))
}
