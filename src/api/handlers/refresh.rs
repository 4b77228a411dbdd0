use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{RefreshRequest, RefreshResponse},
    utils::client_context,
};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService},
};

#[utoipa::path(
    post,
    path = "/refresh-token",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated, new pair issued", body = RefreshResponse),
        (status = 401, description = "Invalid, expired or already rotated refresh token", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh_token(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Unauthorized);
    };

    let tokens = service
        .refresh_rotate(&request.refresh_token, client_context(&headers))
        .await?;

    Ok(Json(RefreshResponse {
        status: "success".to_string(),
        tokens,
    }))
}
