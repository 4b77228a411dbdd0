//! Brute-force lockout.
//!
//! Per-user state lives on the user row: `retry_count`, `is_blocked` and the
//! dedicated `locked_at` lock-start instant. `Open` while below the threshold,
//! `Locked` once it is reached, back to `Open` on the first attempt after the
//! lockout period.
//!
//! Every password verification is claimed on the row before it runs, so a
//! burst of parallel logins gets at most `threshold` verifications per lock
//! window, and a success only resets an account that is still open.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{config::AuthConfig, error::AuthError, users::UserRecord, users::UserRepository};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockStatus {
    Open,
    Locked { remaining_seconds: u64 },
    /// Locked, but the lockout period is over.
    Expired,
}

#[derive(Clone)]
pub struct LoginGuard {
    users: Arc<dyn UserRepository>,
    threshold: u32,
    lockout: chrono::Duration,
}

impl LoginGuard {
    #[must_use]
    pub fn new(config: &AuthConfig, users: Arc<dyn UserRepository>) -> Self {
        let lockout = chrono::Duration::from_std(config.lockout_duration())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            users,
            threshold: config.lockout_threshold(),
            lockout,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn lockout(&self) -> chrono::Duration {
        self.lockout
    }

    /// Pure view of the lock state at `now`.
    ///
    /// A block without a lock start was set outside the guard and holds until
    /// cleared explicitly.
    #[must_use]
    pub fn evaluate(&self, user: &UserRecord, now: DateTime<Utc>) -> LockStatus {
        if !user.is_blocked {
            return LockStatus::Open;
        }
        let Some(locked_at) = user.locked_at else {
            return LockStatus::Locked {
                remaining_seconds: self.lockout_seconds(),
            };
        };
        let remaining = self.lockout - (now - locked_at);
        if remaining <= chrono::Duration::zero() {
            LockStatus::Expired
        } else {
            LockStatus::Locked {
                remaining_seconds: ceil_seconds(remaining),
            }
        }
    }

    /// Gate a login attempt on the snapshot just read. An expired lock is
    /// reopened, at most once per lock.
    ///
    /// # Errors
    /// `AccountLocked` while the lock holds, `Internal` on storage failure.
    pub async fn admit(&self, user: &UserRecord, now: DateTime<Utc>) -> Result<(), AuthError> {
        match self.evaluate(user, now) {
            LockStatus::Open => Ok(()),
            LockStatus::Locked { remaining_seconds } => {
                Err(AuthError::AccountLocked { remaining_seconds })
            }
            LockStatus::Expired => {
                if self
                    .users
                    .reopen_expired_lockout(user.id, now - self.lockout, now)
                    .await?
                {
                    info!(user_id = %user.id, "lockout expired, account reopened");
                }
                Ok(())
            }
        }
    }

    /// Claim one verification for `user_id`. Must succeed before the password
    /// is checked.
    ///
    /// # Errors
    /// `AccountLocked` when the account is blocked or its claims are used up,
    /// `InvalidCredentials` when the user vanished, `Internal` on storage
    /// failure.
    pub async fn reserve(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), AuthError> {
        let state = self
            .users
            .reserve_login_attempt(user_id, self.threshold, now)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if state.is_blocked {
            warn!(user_id = %user_id, retry_count = state.retry_count, "attempt refused, account locked");
            return Err(self.locked(state.locked_at, now));
        }
        Ok(())
    }

    /// Settle a claimed attempt that failed verification. Returns the error
    /// the caller should surface.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    pub async fn record_failure(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<AuthError> {
        let state = self
            .users
            .record_failed_login(user_id, self.threshold, now)
            .await?;
        match state {
            Some(state) if state.is_blocked => {
                warn!(user_id = %user_id, retry_count = state.retry_count, "account locked");
                Ok(self.locked(state.locked_at, now))
            }
            _ => Ok(AuthError::InvalidCredentials),
        }
    }

    /// Settle a claimed attempt that verified.
    ///
    /// # Errors
    /// `AccountLocked` when a concurrent attempt locked the account first,
    /// `Internal` on storage failure.
    pub async fn record_success(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), AuthError> {
        if self.users.record_successful_login(user_id, now).await? {
            return Ok(());
        }
        let locked_at = self
            .users
            .find_by_id(user_id)
            .await?
            .and_then(|user| user.locked_at);
        warn!(user_id = %user_id, "correct password refused, account locked meanwhile");
        Err(self.locked(locked_at, now))
    }

    /// Clear every lock whose period ended by `now`.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<u64> {
        self.users
            .clear_expired_lockouts(now - self.lockout, now)
            .await
    }

    fn lockout_seconds(&self) -> u64 {
        ceil_seconds(self.lockout)
    }

    fn locked(&self, locked_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> AuthError {
        let remaining_seconds = match locked_at {
            Some(at) => ceil_seconds(self.lockout - (now - at)),
            None => self.lockout_seconds(),
        };
        AuthError::AccountLocked { remaining_seconds }
    }
}

impl std::fmt::Debug for LoginGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGuard")
            .field("threshold", &self.threshold)
            .field("lockout", &self.lockout)
            .finish_non_exhaustive()
    }
}

fn ceil_seconds(duration: chrono::Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        memory::MemoryUserRepository,
        roles::Role,
        users::{InsertOutcome, NewUser},
    };
    use anyhow::anyhow;
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("0123456789abcdef0123456789abcdef"))
    }

    async fn setup() -> Result<(Arc<MemoryUserRepository>, LoginGuard, UserRecord)> {
        let repo = Arc::new(MemoryUserRepository::default());
        let guard = LoginGuard::new(&config(), repo.clone());
        let user = NewUser {
            email: "alice@example.com".to_string(),
            password_hash: "hash".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            role: Role::User,
        };
        match repo.insert(user, Utc::now()).await? {
            InsertOutcome::Created(user) => Ok((repo, guard, user)),
            InsertOutcome::Conflict => Err(anyhow!("conflict")),
        }
    }

    async fn fail(guard: &LoginGuard, user_id: Uuid, now: DateTime<Utc>) -> Result<AuthError> {
        guard.reserve(user_id, now).await?;
        guard.record_failure(user_id, now).await
    }

    #[tokio::test]
    async fn fifth_failure_locks() -> Result<()> {
        let (repo, guard, user) = setup().await?;
        let now = Utc::now();

        for _ in 0..4 {
            let err = fail(&guard, user.id, now).await?;
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = fail(&guard, user.id, now).await?;
        assert!(matches!(
            err,
            AuthError::AccountLocked {
                remaining_seconds: 180
            }
        ));

        let user = repo.get(user.id).ok_or_else(|| anyhow!("missing user"))?;
        assert!(user.is_blocked);
        assert_eq!(user.retry_count, 5);
        assert_eq!(user.locked_at, Some(now));
        Ok(())
    }

    #[tokio::test]
    async fn claims_beyond_threshold_lock_without_verifying() -> Result<()> {
        let (repo, guard, user) = setup().await?;
        let now = Utc::now();

        // Five attempts in flight, none settled yet.
        for _ in 0..5 {
            guard.reserve(user.id, now).await?;
        }
        assert!(matches!(
            guard.reserve(user.id, now).await,
            Err(AuthError::AccountLocked {
                remaining_seconds: 180
            })
        ));

        let row = repo.get(user.id).ok_or_else(|| anyhow!("missing user"))?;
        assert!(row.is_blocked);
        assert_eq!(row.retry_count, 5);
        assert_eq!(row.locked_at, Some(now));

        // An in-flight attempt whose password was right cannot reopen it.
        assert!(matches!(
            guard.record_success(user.id, now).await,
            Err(AuthError::AccountLocked { .. })
        ));
        assert_eq!(repo.get(user.id).map(|u| u.is_blocked), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn lock_holds_then_expires() -> Result<()> {
        let (repo, guard, user) = setup().await?;
        let start = Utc::now();
        for _ in 0..5 {
            fail(&guard, user.id, start).await?;
        }
        let locked = repo.get(user.id).ok_or_else(|| anyhow!("missing user"))?;

        let during = start + chrono::Duration::milliseconds(179_500);
        assert_eq!(
            guard.evaluate(&locked, during),
            LockStatus::Locked {
                remaining_seconds: 1
            }
        );
        assert!(matches!(
            guard.admit(&locked, during).await,
            Err(AuthError::AccountLocked { .. })
        ));

        let after = start + chrono::Duration::seconds(180);
        assert_eq!(guard.evaluate(&locked, after), LockStatus::Expired);
        assert!(guard.admit(&locked, after).await.is_ok());

        let reopened = repo.get(user.id).ok_or_else(|| anyhow!("missing user"))?;
        assert!(!reopened.is_blocked);
        assert_eq!(reopened.retry_count, 0);
        assert_eq!(reopened.locked_at, None);
        Ok(())
    }

    #[tokio::test]
    async fn stale_snapshot_reopens_only_once() -> Result<()> {
        let (repo, guard, user) = setup().await?;
        let start = Utc::now();
        for _ in 0..5 {
            fail(&guard, user.id, start).await?;
        }
        let stale = repo.get(user.id).ok_or_else(|| anyhow!("missing user"))?;

        let after = start + chrono::Duration::seconds(180);
        guard.admit(&stale, after).await?;
        fail(&guard, user.id, after).await?;
        fail(&guard, user.id, after).await?;

        // A second request holding the pre-expiry snapshot must not wipe the new count.
        guard.admit(&stale, after).await?;
        assert_eq!(repo.get(user.id).map(|u| u.retry_count), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn success_resets_counter() -> Result<()> {
        let (repo, guard, user) = setup().await?;
        let now = Utc::now();
        fail(&guard, user.id, now).await?;
        fail(&guard, user.id, now).await?;
        guard.reserve(user.id, now).await?;
        guard.record_success(user.id, now).await?;

        let user = repo.get(user.id).ok_or_else(|| anyhow!("missing user"))?;
        assert_eq!(user.retry_count, 0);
        assert_eq!(user.last_login, Some(now));
        Ok(())
    }

    #[tokio::test]
    async fn manual_block_without_lock_start_holds() -> Result<()> {
        let (repo, guard, mut user) = setup().await?;
        user.is_blocked = true;
        repo.put(user.clone());

        let far = Utc::now() + chrono::Duration::days(30);
        assert!(matches!(
            guard.evaluate(&user, far),
            LockStatus::Locked { .. }
        ));
        assert_eq!(guard.reconcile(far).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_clears_elapsed_locks() -> Result<()> {
        let (repo, guard, user) = setup().await?;
        let start = Utc::now();
        for _ in 0..5 {
            fail(&guard, user.id, start).await?;
        }
        assert_eq!(
            guard.reconcile(start + chrono::Duration::seconds(60)).await?,
            0
        );
        assert_eq!(
            guard
                .reconcile(start + chrono::Duration::seconds(180))
                .await?,
            1
        );
        assert_eq!(repo.get(user.id).map(|u| u.is_blocked), Some(false));
        Ok(())
    }

    #[test]
    fn ceil_seconds_rounds_up() {
        assert_eq!(ceil_seconds(chrono::Duration::milliseconds(1)), 1);
        assert_eq!(ceil_seconds(chrono::Duration::milliseconds(1000)), 1);
        assert_eq!(ceil_seconds(chrono::Duration::milliseconds(1001)), 2);
        assert_eq!(ceil_seconds(chrono::Duration::zero()), 1);
    }
}
