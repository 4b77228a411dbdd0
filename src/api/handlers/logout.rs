use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{types::MessageResponse, utils::authenticate};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService},
};

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Every session of the caller revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    let revoked = service.logout(&identity).await?;

    Ok(Json(MessageResponse::success(format!(
        "Logged out of {revoked} session(s)"
    ))))
}
