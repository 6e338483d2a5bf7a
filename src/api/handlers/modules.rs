//! Module catalogue, progress recording and quiz grading.

use crate::api::context::{ApiJson, ApiQuery, AuthUser, DeviceId};
use crate::api::effects::non_critical;
use crate::api::error::{ApiError, ErrorBody};
use crate::api::grading::{grade_submission, GradeRequest, Learner};
use crate::api::models::{Module, QuizGrading};
use crate::api::response::{empty, message, Envelope};
use crate::api::state::AppState;
use crate::api::store::{NewLearningProgress, Store};
use anyhow::Context;
use axum::extract::Extension;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProgressRequest {
    pub module_id: i64,
    #[serde(default)]
    pub module_file_ranking: i32,
    #[serde(default)]
    pub seek: f64,
}

impl ProgressRequest {
    pub(crate) fn into_progress(
        self,
        user_id: Option<i64>,
        device: &DeviceId,
    ) -> NewLearningProgress {
        NewLearningProgress {
            user_id,
            device_unique_id: device.0.clone(),
            module_id: self.module_id,
            module_file_ranking: self.module_file_ranking,
            seek: self.seek,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

/// Load modules with `select`, then attach their details, in one read transaction.
pub(crate) async fn detailed_modules(
    store: &dyn Store,
    select: ModuleSelection<'_>,
) -> Result<Vec<Module>, ApiError> {
    let mut tx = store.begin().await.context("begin tx")?;

    let modules = match select {
        ModuleSelection::Active => tx.active_modules().await.context("getting modules")?,
        ModuleSelection::Ids(ids) => tx
            .modules_by_ids(ids)
            .await
            .with_context(|| format!("getting modules by ids: {ids:?}"))?,
        ModuleSelection::Search(query) => tx
            .search_modules(query)
            .await
            .with_context(|| format!("searching modules: {query}"))?,
    };
    let modules = tx
        .with_module_details(modules)
        .await
        .context("getting module details")?;

    tx.rollback().await.context("closing read transaction")?;

    Ok(modules)
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ModuleSelection<'a> {
    Active,
    Ids(&'a [i64]),
    Search(&'a str),
}

/// Write a progress row, logging instead of failing.
pub(crate) async fn record(store: &dyn Store, progress: NewLearningProgress) {
    non_critical("record_progress", async {
        let mut tx = store.begin().await?;
        tx.record_progress(&progress).await?;
        tx.commit().await
    })
    .await;
}

#[utoipa::path(
    get,
    path = "/api/v0.1/modules",
    responses(
        (status = 200, description = "Active modules with their details", body = [Module]),
        (status = 403, description = "Missing or invalid access token", body = ErrorBody),
    ),
    tag = "modules"
)]
pub async fn list(
    state: Extension<Arc<AppState>>,
    _caller: AuthUser,
) -> Result<Envelope<Vec<Module>>, ApiError> {
    let modules = detailed_modules(state.store.as_ref(), ModuleSelection::Active).await?;
    Ok(message(modules))
}

#[utoipa::path(
    get,
    path = "/api/v0.1/modules/participants",
    responses(
        (status = 200, description = "Distinct learners per module id", body = HashMap<String, i64>),
    ),
    tag = "modules"
)]
pub async fn participants(
    state: Extension<Arc<AppState>>,
    _caller: AuthUser,
) -> Result<Envelope<HashMap<i64, i64>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let participants = tx
        .module_participants()
        .await
        .context("getting module participants")?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(participants))
}

#[utoipa::path(
    get,
    path = "/api/v0.1/modules/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Modules whose name or description match", body = [Module]),
    ),
    tag = "modules"
)]
pub async fn search(
    state: Extension<Arc<AppState>>,
    _caller: AuthUser,
    ApiQuery(search): ApiQuery<SearchQuery>,
) -> Result<Envelope<Vec<Module>>, ApiError> {
    let modules = detailed_modules(
        state.store.as_ref(),
        ModuleSelection::Search(search.query.trim()),
    )
    .await?;
    Ok(message(modules))
}

#[utoipa::path(
    post,
    path = "/api/v0.1/modules/record_progress",
    request_body = ProgressRequest,
    responses(
        (status = 200, description = "Accepted; storage failures are only logged"),
    ),
    tag = "modules"
)]
#[instrument(skip_all, fields(user_id = caller.user_id))]
pub async fn record_progress(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    device: DeviceId,
    ApiJson(request): ApiJson<ProgressRequest>,
) -> Envelope<()> {
    record(
        state.store.as_ref(),
        request.into_progress(Some(caller.user_id), &device),
    )
    .await;
    empty()
}

#[utoipa::path(
    post,
    path = "/api/v0.1/modules/grade",
    request_body = GradeRequest,
    responses(
        (status = 200, description = "Graded answers of this take", body = [QuizGrading]),
        (status = 404, description = "Unknown quiz or module", body = ErrorBody),
    ),
    tag = "modules"
)]
#[instrument(skip_all, fields(user_id = caller.user_id))]
pub async fn grade(
    state: Extension<Arc<AppState>>,
    caller: AuthUser,
    device: DeviceId,
    ApiJson(request): ApiJson<GradeRequest>,
) -> Result<Envelope<Vec<QuizGrading>>, ApiError> {
    let learner = Learner {
        user_id: caller.user_id,
        device_unique_id: device.0,
    };

    let outcome = grade_submission(state.store.as_ref(), &learner, &request).await?;
    if let Some(next_module_id) = outcome.next_module_id {
        info!(next_module_id, "Learner moved to next module");
    }

    Ok(message(outcome.gradings))
}
