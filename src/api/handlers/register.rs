use axum::{extract::Extension, http::HeaderMap, http::StatusCode, Json};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{AuthResponse, RegisterRequest},
    utils::{check_password, client_context, valid_email, MIN_NAME_LEN},
};
use crate::{
    api::error::ErrorBody,
    auth::{service::normalize_email, service::Registration, AuthError, AuthSessionService},
};

#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input or email already registered", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    headers: HeaderMap,
    service: Extension<Arc<AuthSessionService>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };

    if !valid_email(&normalize_email(&request.email)) {
        return Err(AuthError::Validation("Invalid email".to_string()));
    }
    check_password(&request.password)?;
    for (field, value) in [
        ("first_name", &request.first_name),
        ("last_name", &request.last_name),
    ] {
        if value.trim().chars().count() < MIN_NAME_LEN {
            return Err(AuthError::Validation(format!(
                "{field} must be at least {MIN_NAME_LEN} characters"
            )));
        }
    }

    let registration = Registration {
        email: request.email,
        password: request.password,
        first_name: request.first_name,
        last_name: request.last_name,
    };
    let authenticated = service
        .register(registration, client_context(&headers))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            status: "success".to_string(),
            user: authenticated.user.into(),
            tokens: authenticated.tokens,
        }),
    ))
}
