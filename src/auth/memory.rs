//! In-process repositories and queue.
//!
//! Same contracts as the Postgres implementations, each repository guarded by
//! one mutex so every operation is atomic. Used by tests and local runs.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use uuid::Uuid;

use super::{
    action::{ActionPurpose, ActionToken, ActionTokenRepository},
    notify::{Notification, NotificationQueue},
    roles::Role,
    session::{Rotation, Session, SessionRepository},
    users::{InsertOutcome, LockState, NewUser, UserRecord, UserRepository},
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("in-memory store poisoned"))
}

#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<Uuid, UserRecord>>,
}

impl MemoryUserRepository {
    /// Snapshot of a user row, for assertions.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<UserRecord> {
        self.users.lock().ok()?.get(&id).cloned()
    }

    /// Snapshot of a user row looked up by normalized email.
    #[must_use]
    pub fn find(&self, email: &str) -> Option<UserRecord> {
        self.users
            .lock()
            .ok()?
            .values()
            .find(|user| user.email == email)
            .cloned()
    }

    /// Overwrite a row directly, bypassing the repository contract.
    pub fn put(&self, user: UserRecord) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.id, user);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.lock().map_or(0, |users| users.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let users = lock(&self.users)?;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(lock(&self.users)?.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser, now: DateTime<Utc>) -> Result<InsertOutcome> {
        let mut users = lock(&self.users)?;
        if users.values().any(|existing| existing.email == user.email) {
            return Ok(InsertOutcome::Conflict);
        }
        let record = UserRecord {
            id: Uuid::now_v7(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_active: true,
            is_verified: false,
            is_blocked: false,
            retry_count: 0,
            locked_at: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn reserve_login_attempt(
        &self,
        id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<LockState>> {
        let mut users = lock(&self.users)?;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if !user.is_blocked {
            if i64::from(user.retry_count) < i64::from(threshold) {
                user.retry_count += 1;
            } else {
                user.is_blocked = true;
                user.locked_at = Some(now);
            }
            user.updated_at = now;
        }
        Ok(Some(LockState::of(user)))
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<LockState>> {
        let mut users = lock(&self.users)?;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if !user.is_blocked && i64::from(user.retry_count) >= i64::from(threshold) {
            user.is_blocked = true;
            user.locked_at = Some(now);
        }
        user.updated_at = now;
        Ok(Some(LockState::of(user)))
    }

    async fn record_successful_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut users = lock(&self.users)?;
        let Some(user) = users.get_mut(&id).filter(|user| !user.is_blocked) else {
            return Ok(false);
        };
        user.retry_count = 0;
        user.locked_at = None;
        user.last_login = Some(now);
        user.updated_at = now;
        Ok(true)
    }

    async fn reopen_expired_lockout(
        &self,
        id: Uuid,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut users = lock(&self.users)?;
        let Some(user) = users
            .get_mut(&id)
            .filter(|user| user.is_blocked && user.locked_at.is_some_and(|at| at <= cutoff))
        else {
            return Ok(false);
        };
        user.retry_count = 0;
        user.is_blocked = false;
        user.locked_at = None;
        user.updated_at = now;
        Ok(true)
    }

    async fn clear_lockout(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut users = lock(&self.users)?;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        user.retry_count = 0;
        user.is_blocked = false;
        user.locked_at = None;
        user.updated_at = now;
        Ok(true)
    }

    async fn clear_expired_lockouts(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut users = lock(&self.users)?;
        let mut cleared = 0;
        for user in users.values_mut() {
            if user.is_blocked && user.locked_at.is_some_and(|at| at <= cutoff) {
                user.retry_count = 0;
                user.is_blocked = false;
                user.locked_at = None;
                user.updated_at = now;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn mark_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut users = lock(&self.users)?;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        user.is_verified = true;
        user.updated_at = now;
        Ok(true)
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str, now: DateTime<Utc>) -> Result<()> {
        let mut users = lock(&self.users)?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        user.password_hash = hash.to_string();
        user.updated_at = now;
        Ok(())
    }

    async fn update_role(
        &self,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRecord>> {
        let mut users = lock(&self.users)?;
        let Some(user) = users.values_mut().find(|user| user.email == email) else {
            return Ok(None);
        };
        user.role = role;
        user.updated_at = now;
        Ok(Some(user.clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionRepository {
    /// Every row, active or not.
    #[must_use]
    pub fn all(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert(&self, session: Session) -> Result<Session> {
        let mut sessions = lock(&self.sessions)?;
        let duplicate = sessions.values().any(|existing| {
            existing.access_token_hash == session.access_token_hash
                || existing.refresh_token_hash == session.refresh_token_hash
        });
        if duplicate {
            return Err(anyhow!("duplicate session token digest"));
        }
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_active_by_access_hash(
        &self,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let sessions = lock(&self.sessions)?;
        Ok(sessions
            .values()
            .find(|s| s.user_id == user_id && s.access_token_hash == hash && s.is_valid(now))
            .cloned())
    }

    async fn find_active_by_refresh_hash(
        &self,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let sessions = lock(&self.sessions)?;
        Ok(sessions
            .values()
            .find(|s| s.user_id == user_id && s.refresh_token_hash == hash && s.is_valid(now))
            .cloned())
    }

    async fn rotate(&self, rotation: Rotation, now: DateTime<Utc>) -> Result<Option<Session>> {
        let mut sessions = lock(&self.sessions)?;
        let Some(session) = sessions.values_mut().find(|s| {
            s.user_id == rotation.user_id
                && s.refresh_token_hash == rotation.old_refresh_hash
                && s.is_valid(now)
        }) else {
            return Ok(None);
        };
        session.access_token_hash = rotation.access_token_hash;
        session.refresh_token_hash = rotation.refresh_token_hash;
        session.ip_address = rotation.ip_address;
        session.user_agent = rotation.user_agent;
        session.last_activity = now;
        Ok(Some(session.clone()))
    }

    async fn touch(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut sessions = lock(&self.sessions)?;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.last_activity = now;
        }
        Ok(())
    }

    async fn deactivate_all(&self, user_id: Uuid) -> Result<u64> {
        let mut sessions = lock(&self.sessions)?;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = lock(&self.sessions)?;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.is_active && session.expires_at <= now {
                session.is_active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let sessions = lock(&self.sessions)?;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_valid(now))
            .cloned()
            .collect();
        active.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(active)
    }
}

/// Queue that keeps everything it is handed.
#[derive(Debug, Default)]
pub struct MemoryActionTokenRepository {
    tokens: Mutex<Vec<ActionToken>>,
}

impl MemoryActionTokenRepository {
    /// Every stored token, spent or not.
    #[must_use]
    pub fn all(&self) -> Vec<ActionToken> {
        self.tokens
            .lock()
            .map(|tokens| tokens.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionTokenRepository for MemoryActionTokenRepository {
    async fn issue(&self, token: ActionToken) -> Result<()> {
        let mut tokens = lock(&self.tokens)?;
        for older in tokens.iter_mut().filter(|t| {
            t.user_id == token.user_id && t.purpose == token.purpose && t.used_at.is_none()
        }) {
            older.used_at = Some(token.created_at);
        }
        tokens.push(token);
        Ok(())
    }

    async fn redeem(
        &self,
        purpose: ActionPurpose,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut tokens = lock(&self.tokens)?;
        let Some(token) = tokens.iter_mut().find(|t| {
            t.purpose == purpose
                && t.token_hash == token_hash
                && t.used_at.is_none()
                && now < t.expires_at
        }) else {
            return Ok(None);
        };
        token.used_at = Some(now);
        Ok(Some(token.user_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tokens = lock(&self.tokens)?;
        let before = tokens.len();
        tokens.retain(|t| t.used_at.is_none() && now < t.expires_at);
        Ok(u64::try_from(before - tokens.len()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryQueue {
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl NotificationQueue for MemoryQueue {
    fn enqueue(&self, notification: Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
    }
}
