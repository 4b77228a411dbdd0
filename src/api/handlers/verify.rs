//! Email verification.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{MessageResponse, UserView, VerifyEmailRequest},
    utils::authenticate,
};
use crate::{
    api::error::ErrorBody,
    auth::{AuthError, AuthSessionService},
};

#[utoipa::path(
    post,
    path = "/send-verification",
    responses(
        (status = 200, description = "Verification token mailed", body = MessageResponse),
        (status = 400, description = "Email already verified", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
#[instrument(skip_all)]
pub async fn send_verification(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
) -> Result<Json<MessageResponse>, AuthError> {
    let identity = authenticate(&headers, &service).await?;
    service.send_verification(&identity).await?;
    Ok(Json(MessageResponse::success(
        "Verification email sent successfully",
    )))
}

#[utoipa::path(
    post,
    path = "/verify",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = UserView),
        (status = 400, description = "Token invalid, spent or expired", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn verify_email(
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Result<Json<UserView>, AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    let user = service.verify_email(request.token.trim()).await?;
    Ok(Json(user.into()))
}
