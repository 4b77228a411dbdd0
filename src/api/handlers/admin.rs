//! Role administration.
//!
//! Role checks run in the service against the role stored on the caller's
//! user row, so a demoted admin loses access on the next request.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{ChangeRoleRequest, MessageResponse, UnlockRequest, UserView},
    utils::authenticate,
};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService, Role},
};

#[utoipa::path(
    post,
    path = "/admin/change-role",
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = UserView),
        (status = 400, description = "Unknown role", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
        (status = 404, description = "No user with that email", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn change_role(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<ChangeRoleRequest>>,
) -> Result<Json<UserView>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    let role = request
        .new_role
        .parse::<Role>()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    let user = service
        .change_role(&identity, &request.email, role)
        .await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    post,
    path = "/admin/unlock",
    request_body = UnlockRequest,
    responses(
        (status = 200, description = "Lockout cleared", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "Caller is below moderator", body = ErrorBody),
        (status = 404, description = "No user with that email", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn unlock(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<UnlockRequest>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };

    service.unlock(&identity, &request.email).await?;
    Ok(Json(MessageResponse::success("Account unlocked")))
}
