//! Error taxonomy for authentication and session handling.
//!
//! Every variant except `Internal` is terminal for the request and safe to show
//! to the client. `Internal` carries the underlying cause for logging only.

use super::token::TokenError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown email and wrong password share this variant.
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account locked. Try again in {remaining_seconds} seconds")]
    AccountLocked { remaining_seconds: u64 },
    #[error("Account is inactive")]
    AccountInactive,
    #[error("Email already registered")]
    EmailAlreadyRegistered,
    #[error("Token has expired")]
    ExpiredToken,
    #[error("Invalid token")]
    InvalidToken,
    /// Token verified but its session was logged out or rotated away.
    #[error("Invalid or expired session")]
    SessionNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not enough permissions")]
    Forbidden,
    #[error("User not found")]
    UserNotFound,
    /// Password reset or email verification token unknown, spent or expired.
    #[error("Invalid or expired token")]
    InvalidActionToken,
    #[error("Email already verified")]
    AlreadyVerified,
    #[error("{0}")]
    Validation(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Map a codec failure on an access token.
    #[must_use]
    pub fn from_access_token(err: &TokenError) -> Self {
        match err {
            TokenError::Expired => Self::ExpiredToken,
            TokenError::InvalidSignature
            | TokenError::Malformed
            | TokenError::WrongAudienceOrIssuer => Self::InvalidToken,
            TokenError::Signing(_) => Self::Unauthorized,
        }
    }
}
