//! Single-use emailed tokens for password reset and email verification.
//!
//! The raw token only ever travels in the notification; rows keep its SHA-256
//! digest. Redeeming is one conditional write, so a token is spent at most
//! once even when presented concurrently. Issuing a new token spends every
//! unused token of the same purpose for that user.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use super::session::hash_token;

const TOKEN_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionPurpose {
    PasswordReset,
    EmailVerification,
}

impl ActionPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: ActionPurpose,
    pub token_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ActionTokenRepository: Send + Sync {
    /// Store a fresh token and spend the user's older unused ones of the same purpose.
    async fn issue(&self, token: ActionToken) -> Result<()>;

    /// Spend an unused token that has not expired at `now`. Returns its owner,
    /// `None` when nothing matched.
    async fn redeem(
        &self,
        purpose: ActionPurpose,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>>;

    /// Drop tokens that are spent or expired at `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct ActionTokens {
    repo: Arc<dyn ActionTokenRepository>,
    ttl: Duration,
}

impl ActionTokens {
    #[must_use]
    pub fn new(repo: Arc<dyn ActionTokenRepository>, ttl: Duration) -> Self {
        Self { repo, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for `user_id` and return the raw value to be mailed.
    ///
    /// # Errors
    /// Returns an error if the token cannot be stored.
    pub async fn issue(
        &self,
        user_id: Uuid,
        purpose: ActionPurpose,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let ttl = chrono::Duration::from_std(self.ttl).context("action token ttl out of range")?;
        let raw = generate_token();
        self.repo
            .issue(ActionToken {
                id: Uuid::now_v7(),
                user_id,
                purpose,
                token_hash: hash_token(&raw),
                created_at: now,
                expires_at: now + ttl,
                used_at: None,
            })
            .await?;
        Ok(raw)
    }

    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn redeem(
        &self,
        purpose: ActionPurpose,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        self.repo.redeem(purpose, &hash_token(token), now).await
    }

    /// # Errors
    /// Returns an error if the purge fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.repo.purge_expired(now).await
    }
}

impl std::fmt::Debug for ActionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionTokens")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}
