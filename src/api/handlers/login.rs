use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{AuthResponse, LoginRequest},
    utils::client_context,
};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService},
};

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted, new session opened", body = AuthResponse),
        (status = 400, description = "Missing payload", body = ErrorBody),
        (status = 401, description = "Invalid email or password", body = ErrorBody),
        (status = 403, description = "Account locked or inactive", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<AuthResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };

    let authenticated = service
        .login(&request.email, &request.password, client_context(&headers))
        .await?;

    Ok(Json(AuthResponse {
        status: "success".to_string(),
        user: authenticated.user.into(),
        tokens: authenticated.tokens,
    }))
}
