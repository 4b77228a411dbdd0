//! HTTP mapping for `AuthError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::auth::AuthError;

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

impl ErrorBody {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

#[must_use]
pub fn status_code(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::ExpiredToken
        | AuthError::InvalidToken
        | AuthError::SessionNotFound
        | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
        AuthError::AccountLocked { .. } | AuthError::AccountInactive | AuthError::Forbidden => {
            StatusCode::FORBIDDEN
        }
        AuthError::EmailAlreadyRegistered
        | AuthError::Validation(_)
        | AuthError::InvalidActionToken
        | AuthError::AlreadyVerified => StatusCode::BAD_REQUEST,
        AuthError::UserNotFound => StatusCode::NOT_FOUND,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(cause) = &self {
            error!("request failed: {cause:#}");
        }
        let status = status_code(&self);
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
