//! User roles and the static role hierarchy.
//!
//! A role grants every role listed after it in the hierarchy: an admin can do
//! anything a moderator can, a moderator anything a user can, and so on.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use super::error::AuthError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    #[default]
    User,
    Guest,
}

const ADMIN_HIERARCHY: &[Role] = &[Role::Admin, Role::Moderator, Role::User, Role::Guest];
const MODERATOR_HIERARCHY: &[Role] = &[Role::Moderator, Role::User, Role::Guest];
const USER_HIERARCHY: &[Role] = &[Role::User, Role::Guest];
const GUEST_HIERARCHY: &[Role] = &[Role::Guest];

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Moderator, Role::User, Role::Guest];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }

    /// Roles granted by `self`, highest first.
    #[must_use]
    pub const fn hierarchy(self) -> &'static [Role] {
        match self {
            Self::Admin => ADMIN_HIERARCHY,
            Self::Moderator => MODERATOR_HIERARCHY,
            Self::User => USER_HIERARCHY,
            Self::Guest => GUEST_HIERARCHY,
        }
    }

    #[must_use]
    pub fn permits(self, required: Role) -> bool {
        self.hierarchy().contains(&required)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "moderator" => Ok(Self::Moderator),
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}

/// Succeeds when `role` grants at least one of `allowed`.
///
/// # Errors
/// Returns `AuthError::Forbidden` otherwise.
pub fn require_role(role: Role, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.iter().any(|required| role.permits(*required)) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
