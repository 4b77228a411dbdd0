//! User rows as seen by the authentication core.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::roles::Role;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    /// Set once the owner redeemed an email verification token.
    pub is_verified: bool,
    pub is_blocked: bool,
    pub retry_count: i32,
    /// Start of the current lockout, `None` when not locked by the guard.
    pub locked_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

#[derive(Debug)]
pub enum InsertOutcome {
    Created(UserRecord),
    Conflict,
}

/// Lockout columns as left by an attempt reservation or a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockState {
    pub retry_count: i32,
    pub is_blocked: bool,
    pub locked_at: Option<DateTime<Utc>>,
}

impl LockState {
    #[must_use]
    pub fn of(user: &UserRecord) -> Self {
        Self {
            retry_count: user.retry_count,
            is_blocked: user.is_blocked,
            locked_at: user.locked_at,
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;

    /// Insert a new user; a duplicate email yields `InsertOutcome::Conflict`.
    async fn insert(&self, user: NewUser, now: DateTime<Utc>) -> Result<InsertOutcome>;

    /// Claim one password verification before it runs.
    ///
    /// An open account below `threshold` gets `retry_count + 1`. An open
    /// account whose claims already reached `threshold` is blocked with
    /// `locked_at = now` instead. A blocked account is left untouched. The
    /// caller may verify only when the returned state is not blocked.
    async fn reserve_login_attempt(
        &self,
        id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<LockState>>;

    /// Settle a reserved attempt whose password did not verify: block the
    /// account once `retry_count` has reached `threshold`, stamping
    /// `locked_at` on the transition.
    async fn record_failed_login(
        &self,
        id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<LockState>>;

    /// Reset the lockout columns and stamp `last_login`, unless the account
    /// was blocked meanwhile. Returns false when nothing was reset.
    async fn record_successful_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Reopen the account only if its lock started at or before `cutoff`.
    async fn reopen_expired_lockout(
        &self,
        id: Uuid,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Returns false when the user does not exist.
    async fn clear_lockout(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Clear every lockout that started at or before `cutoff`.
    async fn clear_expired_lockouts(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>)
        -> Result<u64>;

    /// Returns false when the user does not exist.
    async fn mark_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn update_password_hash(&self, id: Uuid, hash: &str, now: DateTime<Utc>) -> Result<()>;

    /// Returns the updated row, `None` when no user has that email.
    async fn update_role(
        &self,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRecord>>;
}
