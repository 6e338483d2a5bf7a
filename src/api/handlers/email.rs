use crate::api::context::{AdminUser, ApiQuery};
use crate::api::error::{ApiError, ErrorBody};
use crate::api::mailer::{send_with_timeout, waitlist_message};
use crate::api::models::EmailType;
use crate::api::response::{message, Envelope};
use crate::api::state::AppState;
use anyhow::Context;
use axum::extract::Extension;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::IntoParams;

const PREVIEW_WAITLIST_CODE: &str = "FAKE-123456";

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PreviewQuery {
    /// Template to preview, e.g. `waitlist`.
    #[serde(default, rename = "type")]
    pub email_type: String,
}

#[utoipa::path(
    get,
    path = "/api/v0.1/email/preview",
    params(PreviewQuery),
    responses(
        (status = 200, description = "Preview sent to the caller", body = String),
        (status = 400, description = "No preview for this template", body = ErrorBody),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
    ),
    tag = "email"
)]
#[instrument(skip_all, fields(user_id = admin.id))]
pub async fn preview(
    state: Extension<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiQuery(query): ApiQuery<PreviewQuery>,
) -> Result<Envelope<&'static str>, ApiError> {
    let requested = query.email_type.trim().to_ascii_uppercase();
    if requested.is_empty() {
        return Err(ApiError::invalid("invalid email type: "));
    }

    match requested.parse::<EmailType>() {
        Ok(EmailType::Waitlist) => {
            let preview = waitlist_message(&admin.email, PREVIEW_WAITLIST_CODE)?;
            send_with_timeout(state.mailer.as_ref(), &preview, state.auth.mail_timeout())
                .await
                .context("sending waitlist preview")?;
        }
        _ => {
            return Err(ApiError::invalid(format!(
                "no way to handle preview for email template {requested}"
            )))
        }
    }

    info!(email_type = %requested, "Preview email sent");

    Ok(message("email sent to your email address"))
}
