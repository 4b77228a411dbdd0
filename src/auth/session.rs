//! Persisted sessions.
//!
//! A session row pairs a user with the SHA-256 digests of its current access
//! and refresh tokens. It is valid while `is_active` and `now < expires_at`.
//! `SessionStore` is the only writer of session rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

pub const TOKEN_TYPE: &str = "bearer";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_token_hash: Vec<u8>,
    pub refresh_token_hash: Vec<u8>,
    pub token_type: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }
}

/// Replacement values for an in-place rotation.
#[derive(Clone, Debug)]
pub struct Rotation {
    pub user_id: Uuid,
    pub old_refresh_hash: Vec<u8>,
    pub access_token_hash: Vec<u8>,
    pub refresh_token_hash: Vec<u8>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: Session) -> Result<Session>;

    async fn find_active_by_access_hash(
        &self,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    async fn find_active_by_refresh_hash(
        &self,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// Compare-and-swap on the stored refresh digest. Only a valid session that
    /// still holds `old_refresh_hash` is updated; `None` means nothing matched.
    async fn rotate(&self, rotation: Rotation, now: DateTime<Utc>) -> Result<Option<Session>>;

    async fn touch(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    async fn deactivate_all(&self, user_id: Uuid) -> Result<u64>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>>;
}

/// SHA-256 digest of a raw token string.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
}

impl SessionStore {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Persist a new active session for a freshly issued pair.
    ///
    /// # Errors
    /// Returns an error if the session cannot be stored.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let ttl = chrono::Duration::from_std(ttl).context("session ttl out of range")?;
        let session = Session {
            id: Uuid::now_v7(),
            user_id,
            access_token_hash: hash_token(access_token),
            refresh_token_hash: hash_token(refresh_token),
            token_type: TOKEN_TYPE.to_string(),
            ip_address,
            user_agent,
            created_at: now,
            expires_at: now + ttl,
            last_activity: now,
            is_active: true,
        };
        self.repo.insert(session).await
    }

    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn find_active_by_access_token(
        &self,
        user_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.repo
            .find_active_by_access_hash(user_id, &hash_token(token), now)
            .await
    }

    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn find_active_by_refresh_token(
        &self,
        user_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.repo
            .find_active_by_refresh_hash(user_id, &hash_token(token), now)
            .await
    }

    /// Swap the session holding `old_refresh_token` over to the new pair.
    /// At most one caller wins for a given refresh token.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn rotate(
        &self,
        user_id: Uuid,
        old_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let rotation = Rotation {
            user_id,
            old_refresh_hash: hash_token(old_refresh_token),
            access_token_hash: hash_token(access_token),
            refresh_token_hash: hash_token(refresh_token),
            ip_address,
            user_agent,
        };
        self.repo.rotate(rotation, now).await
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn touch(&self, session: &Session, now: DateTime<Utc>) -> Result<()> {
        self.repo.touch(session.id, now).await
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn deactivate_all(&self, user_id: Uuid) -> Result<u64> {
        self.repo.deactivate_all(user_id).await
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.repo.purge_expired(now).await
    }

    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
        self.repo.list_active(user_id, now).await
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
