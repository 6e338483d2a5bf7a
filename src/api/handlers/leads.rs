//! Anonymous endpoints for visitors who have not signed up yet.
//! Progress is keyed by the device id header alone.

use crate::api::context::{ApiJson, DeviceId, RequestContext};
use crate::api::error::ApiError;
use crate::api::handlers::modules::{detailed_modules, record, ModuleSelection, ProgressRequest};
use crate::api::models::{LearningProgress, Module};
use crate::api::response::{empty, message, Envelope};
use crate::api::state::AppState;
use anyhow::Context;
use axum::extract::Extension;
use std::sync::Arc;
use tracing::debug;

const SHOWCASE_MODULE_IDS: [i64; 3] = [1, 2, 3];

#[utoipa::path(
    get,
    path = "/api/v0.1/leads/modules",
    responses(
        (status = 200, description = "Showcase modules with their details", body = [Module]),
    ),
    tag = "leads"
)]
pub async fn modules(state: Extension<Arc<AppState>>) -> Result<Envelope<Vec<Module>>, ApiError> {
    let modules = detailed_modules(
        state.store.as_ref(),
        ModuleSelection::Ids(&SHOWCASE_MODULE_IDS),
    )
    .await?;
    Ok(message(modules))
}

#[utoipa::path(
    post,
    path = "/api/v0.1/leads/modules/record_progress",
    request_body = ProgressRequest,
    params(
        ("X-GGWP-Device-Unique-Id" = String, Header, description = "Device identifier"),
    ),
    responses(
        (status = 200, description = "Accepted; storage failures are only logged"),
    ),
    tag = "leads"
)]
pub async fn record_progress(
    state: Extension<Arc<AppState>>,
    context: RequestContext,
    ApiJson(request): ApiJson<ProgressRequest>,
) -> Envelope<()> {
    debug!(
        request_id = context.request_id.as_deref().unwrap_or("none"),
        device = context.device.as_str(),
        module_id = request.module_id,
        "Recording anonymous progress"
    );
    record(
        state.store.as_ref(),
        request.into_progress(None, &context.device),
    )
    .await;
    empty()
}

#[utoipa::path(
    get,
    path = "/api/v0.1/leads/modules/learning_progress",
    params(
        ("X-GGWP-Device-Unique-Id" = String, Header, description = "Device identifier"),
    ),
    responses(
        (status = 200, description = "Progress recorded from the device", body = [LearningProgress]),
    ),
    tag = "leads"
)]
pub async fn learning_progress(
    state: Extension<Arc<AppState>>,
    device: DeviceId,
) -> Result<Envelope<Vec<LearningProgress>>, ApiError> {
    let mut tx = state.store.begin().await.context("begin tx")?;
    let progress = tx
        .learning_progress(None, device.as_str())
        .await
        .context("getting learning progress by device")?;
    tx.rollback().await.context("closing read transaction")?;

    Ok(message(progress))
}
