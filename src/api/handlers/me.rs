//! Endpoints about the authenticated caller.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;

use super::{
    types::{SessionSummary, UserView},
    utils::authenticate,
};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService},
};

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile of the authenticated user", body = UserView),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn get_me(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
) -> Result<Json<UserView>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    let user = service.profile(&identity).await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    get,
    path = "/me/sessions",
    responses(
        (status = 200, description = "Active sessions of the authenticated user, newest first", body = [SessionSummary]),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
) -> Result<Json<Vec<SessionSummary>>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    let sessions = service.list_sessions(&identity).await?;
    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}
