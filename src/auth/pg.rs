//! Postgres-backed user and session repositories.
//!
//! All time values are bound from the caller's clock rather than `NOW()` so
//! the database and the service agree on expiry and lockout arithmetic.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    action::{ActionPurpose, ActionToken, ActionTokenRepository},
    roles::Role,
    session::{Rotation, Session, SessionRepository},
    users::{InsertOutcome, LockState, NewUser, UserRecord, UserRepository},
};

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, is_active, \
     is_verified, is_blocked, retry_count, locked_at, last_login, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, access_token_hash, refresh_token_hash, token_type, \
     ip_address, user_agent, created_at, expires_at, last_activity, is_active";

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    let role: String = row.try_get("role")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: role.parse::<Role>()?,
        is_active: row.try_get("is_active")?,
        is_verified: row.try_get("is_verified")?,
        is_blocked: row.try_get("is_blocked")?,
        retry_count: row.try_get("retry_count")?,
        locked_at: row.try_get("locked_at")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn lock_state_from_row(row: &PgRow) -> Result<LockState> {
    Ok(LockState {
        retry_count: row.try_get("retry_count")?,
        is_blocked: row.try_get("is_blocked")?,
        locked_at: row.try_get("locked_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        access_token_hash: row.try_get("access_token_hash")?,
        refresh_token_hash: row.try_get("refresh_token_hash")?,
        token_type: row.try_get("token_type")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        last_activity: row.try_get("last_activity")?,
        is_active: row.try_get("is_active")?,
    })
}

#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert(&self, user: NewUser, now: DateTime<Utc>) -> Result<InsertOutcome> {
        let query = format!(
            r"
            INSERT INTO users
                (id, email, password_hash, first_name, last_name, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {USER_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(InsertOutcome::Created(user_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn reserve_login_attempt(
        &self,
        id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<LockState>> {
        // The row lock serializes concurrent claims; each sees the previous count.
        let query = r"
            UPDATE users SET
                retry_count = CASE
                    WHEN NOT is_blocked AND retry_count < $2 THEN retry_count + 1
                    ELSE retry_count
                END,
                is_blocked = is_blocked OR retry_count >= $2,
                locked_at = CASE
                    WHEN NOT is_blocked AND retry_count >= $2 THEN $3
                    ELSE locked_at
                END,
                updated_at = $3
            WHERE id = $1
            RETURNING retry_count, is_blocked, locked_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(i32::try_from(threshold).unwrap_or(i32::MAX))
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to reserve login attempt")?;
        row.as_ref().map(lock_state_from_row).transpose()
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<LockState>> {
        let query = r"
            UPDATE users SET
                is_blocked = is_blocked OR retry_count >= $2,
                locked_at = CASE
                    WHEN NOT is_blocked AND retry_count >= $2 THEN $3
                    ELSE locked_at
                END,
                updated_at = $3
            WHERE id = $1
            RETURNING retry_count, is_blocked, locked_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(i32::try_from(threshold).unwrap_or(i32::MAX))
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to record failed login")?;
        row.as_ref().map(lock_state_from_row).transpose()
    }

    async fn record_successful_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE users SET
                retry_count = 0,
                locked_at = NULL,
                last_login = $2,
                updated_at = $2
            WHERE id = $1 AND NOT is_blocked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record successful login")?;
        Ok(result.rows_affected() > 0)
    }

    async fn reopen_expired_lockout(
        &self,
        id: Uuid,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            UPDATE users SET
                retry_count = 0,
                is_blocked = FALSE,
                locked_at = NULL,
                updated_at = $3
            WHERE id = $1 AND is_blocked AND locked_at IS NOT NULL AND locked_at <= $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(cutoff)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to reopen expired lockout")?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_lockout(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE users SET
                retry_count = 0,
                is_blocked = FALSE,
                locked_at = NULL,
                updated_at = $2
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear lockout")?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_expired_lockouts(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r"
            UPDATE users SET
                retry_count = 0,
                is_blocked = FALSE,
                locked_at = NULL,
                updated_at = $2
            WHERE is_blocked AND locked_at IS NOT NULL AND locked_at <= $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear expired lockouts")?;
        Ok(result.rows_affected())
    }

    async fn mark_verified(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = "UPDATE users SET is_verified = TRUE, updated_at = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark email verified")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str, now: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(hash)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password hash")?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("user {id} not found"));
        }
        Ok(())
    }

    async fn update_role(
        &self,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRecord>> {
        let query = format!(
            "UPDATE users SET role = $2, updated_at = $3 WHERE email = $1 RETURNING {USER_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .bind(role.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to update role")?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_active_by(
        &self,
        column: &'static str,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND {column} = $2 AND is_active AND expires_at > $3
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(session_from_row).transpose()
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: Session) -> Result<Session> {
        let query = format!(
            r"
            INSERT INTO sessions
                (id, user_id, access_token_hash, refresh_token_hash, token_type,
                 ip_address, user_agent, created_at, expires_at, last_activity, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {SESSION_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.access_token_hash)
            .bind(&session.refresh_token_hash)
            .bind(&session.token_type)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.created_at)
            .bind(session.expires_at)
            .bind(session.last_activity)
            .bind(session.is_active)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        session_from_row(&row)
    }

    async fn find_active_by_access_hash(
        &self,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.find_active_by("access_token_hash", user_id, hash, now)
            .await
    }

    async fn find_active_by_refresh_hash(
        &self,
        user_id: Uuid,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.find_active_by("refresh_token_hash", user_id, hash, now)
            .await
    }

    async fn rotate(&self, rotation: Rotation, now: DateTime<Utc>) -> Result<Option<Session>> {
        // Concurrent rotations of one token serialize on the row lock; the loser
        // re-checks the WHERE clause against the new digest and matches nothing.
        let query = format!(
            r"
            UPDATE sessions SET
                access_token_hash = $3,
                refresh_token_hash = $4,
                ip_address = $5,
                user_agent = $6,
                last_activity = $7
            WHERE user_id = $1
              AND refresh_token_hash = $2
              AND is_active
              AND expires_at > $7
            RETURNING {SESSION_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(rotation.user_id)
            .bind(&rotation.old_refresh_hash)
            .bind(&rotation.access_token_hash)
            .bind(&rotation.refresh_token_hash)
            .bind(&rotation.ip_address)
            .bind(&rotation.user_agent)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to rotate session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn touch(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE sessions SET last_activity = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch session")?;
        Ok(())
    }

    async fn deactivate_all(&self, user_id: Uuid) -> Result<u64> {
        let query = "UPDATE sessions SET is_active = FALSE WHERE user_id = $1 AND is_active";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate sessions")?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "UPDATE sessions SET is_active = FALSE WHERE is_active AND expires_at <= $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND is_active AND expires_at > $2
            ORDER BY created_at DESC
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sessions")?;
        rows.iter().map(session_from_row).collect()
    }
}

#[derive(Clone, Debug)]
pub struct PgActionTokenRepository {
    pool: PgPool,
}

impl PgActionTokenRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionTokenRepository for PgActionTokenRepository {
    async fn issue(&self, token: ActionToken) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin action token transaction")?;

        let spend = r"
            UPDATE action_tokens SET used_at = $3
            WHERE user_id = $1 AND purpose = $2 AND used_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = spend
        );
        sqlx::query(spend)
            .bind(token.user_id)
            .bind(token.purpose.as_str())
            .bind(token.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to spend previous action tokens")?;

        let insert = r"
            INSERT INTO action_tokens
                (id, user_id, purpose, token_hash, created_at, expires_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = insert
        );
        sqlx::query(insert)
            .bind(token.id)
            .bind(token.user_id)
            .bind(token.purpose.as_str())
            .bind(&token.token_hash)
            .bind(token.created_at)
            .bind(token.expires_at)
            .bind(token.used_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert action token")?;

        tx.commit()
            .await
            .context("failed to commit action token")?;
        Ok(())
    }

    async fn redeem(
        &self,
        purpose: ActionPurpose,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let query = r"
            UPDATE action_tokens SET used_at = $3
            WHERE token_hash = $1 AND purpose = $2 AND used_at IS NULL AND expires_at > $3
            RETURNING user_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(purpose.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to redeem action token")?;
        row.map(|row| row.try_get::<Uuid, _>("user_id"))
            .transpose()
            .context("failed to decode action token owner")
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM action_tokens WHERE used_at IS NOT NULL OR expires_at <= $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge action tokens")?;
        Ok(result.rows_affected())
    }
}
