use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{ChangePasswordRequest, ForgotPasswordRequest, MessageResponse, ResetPasswordRequest},
    utils::{authenticate, check_password},
};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService},
};

#[utoipa::path(
    post,
    path = "/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, all sessions revoked", body = MessageResponse),
        (status = 400, description = "New password rejected", body = ErrorBody),
        (status = 401, description = "Not authenticated or wrong current password", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "password"
)]
#[instrument(skip_all)]
pub async fn change_password(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    check_password(&request.new_password)?;

    service
        .change_password(&identity, &request.current_password, &request.new_password)
        .await?;

    Ok(Json(MessageResponse::success(
        "Password changed. Please log in again",
    )))
}

const RESET_REQUESTED: &str = "If your email is registered, you will receive a password reset link";

#[utoipa::path(
    post,
    path = "/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Same answer whether or not the email is registered", body = MessageResponse),
        (status = 400, description = "Missing payload", body = ErrorBody),
    ),
    tag = "password"
)]
#[instrument(skip_all)]
pub async fn forgot_password(
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };

    service.forgot_password(&request.email).await?;

    Ok(Json(MessageResponse::success(RESET_REQUESTED)))
}

#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset, all sessions revoked", body = MessageResponse),
        (status = 400, description = "Token invalid, spent or expired, or new password rejected", body = ErrorBody),
    ),
    tag = "password"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    check_password(&request.new_password)?;

    service
        .reset_password(request.token.trim(), &request.new_password)
        .await?;

    Ok(Json(MessageResponse::success(
        "Password has been reset. Please log in again",
    )))
}
