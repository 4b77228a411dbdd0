//! Login, registration, refresh rotation, logout, identity resolution and
//! the emailed-token flows (password reset, email verification).
//!
//! The service owns no state of its own beyond its collaborators; every
//! decision is made against the injected repositories and clock.

use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    action::{ActionPurpose, ActionTokenRepository, ActionTokens},
    config::AuthConfig,
    credentials::CredentialVerifier,
    error::AuthError,
    guard::LoginGuard,
    notify::{Notification, NotificationKind, NotificationQueue},
    roles::{require_role, Role},
    session::{Session, SessionRepository, SessionStore, TOKEN_TYPE},
    sweeper::Sweeper,
    token::{TokenCodec, TokenError, TokenKind},
    users::{InsertOutcome, NewUser, UserRecord, UserRepository},
    Clock, SystemClock,
};

// Verified against when the email is unknown so both paths cost one hash.
const DUMMY_PASSWORD: &str = "authcore-timing-equalizer";

/// Normalize an email for lookup and uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Where a credential request came from.
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Resolved caller of a protected request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Clone, Debug)]
pub struct Authenticated {
    pub user: UserRecord,
    pub tokens: TokenPair,
}

#[derive(Clone, Debug)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

pub struct AuthSessionService {
    config: AuthConfig,
    codec: TokenCodec,
    credentials: CredentialVerifier,
    guard: LoginGuard,
    sessions: SessionStore,
    tokens: ActionTokens,
    users: Arc<dyn UserRepository>,
    notifications: Arc<dyn NotificationQueue>,
    clock: Arc<dyn Clock>,
    dummy_hash: String,
}

impl AuthSessionService {
    /// # Errors
    /// Returns an error if the signing secret or hash cost is invalid.
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionRepository>,
        tokens: Arc<dyn ActionTokenRepository>,
        notifications: Arc<dyn NotificationQueue>,
    ) -> anyhow::Result<Self> {
        let codec = TokenCodec::new(&config)?;
        let credentials = CredentialVerifier::new(config.hash_cost())?;
        let dummy_hash = credentials.hash(DUMMY_PASSWORD)?;
        let guard = LoginGuard::new(&config, users.clone());
        let tokens = ActionTokens::new(tokens, config.action_token_ttl());

        Ok(Self {
            config,
            codec,
            credentials,
            guard,
            sessions: SessionStore::new(sessions),
            tokens,
            users,
            notifications,
            clock: Arc::new(SystemClock),
            dummy_hash,
        })
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Background cleanup bound to the same stores and clock.
    #[must_use]
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.sessions.clone(),
            self.tokens.clone(),
            self.guard.clone(),
            self.clock.clone(),
        )
    }

    /// # Errors
    /// `InvalidCredentials` for an unknown email or wrong password,
    /// `AccountLocked` while locked, when this failure trips the lock or when
    /// a concurrent attempt tripped it first, `AccountInactive` for a
    /// deactivated account.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientContext,
    ) -> Result<Authenticated, AuthError> {
        let now = self.clock.now();
        let email = normalize_email(email);

        let Some(user) = self.users.find_by_email(&email).await? else {
            self.credentials
                .verify_blocking(password.to_string(), self.dummy_hash.clone())
                .await?;
            info!("login rejected: invalid credentials");
            return Err(AuthError::InvalidCredentials);
        };

        self.guard.admit(&user, now).await?;
        self.guard.reserve(user.id, now).await?;

        let verified = self
            .credentials
            .verify_blocking(password.to_string(), user.password_hash.clone())
            .await?;
        if !verified {
            let err = self.guard.record_failure(user.id, now).await?;
            info!(user_id = %user.id, "login rejected: {err}");
            return Err(err);
        }

        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        self.guard.record_success(user.id, now).await?;
        let tokens = self.open_session(&user, client).await?;

        self.notifications.enqueue(Notification::new(
            NotificationKind::WelcomeBack,
            &user.email,
            &user.first_name,
        ));
        info!(user_id = %user.id, "login succeeded");

        let user = UserRecord {
            retry_count: 0,
            is_blocked: false,
            locked_at: None,
            last_login: Some(now),
            ..user
        };
        Ok(Authenticated { user, tokens })
    }

    /// # Errors
    /// `EmailAlreadyRegistered` when the email exists; no session is created.
    #[instrument(skip_all)]
    pub async fn register(
        &self,
        registration: Registration,
        client: ClientContext,
    ) -> Result<Authenticated, AuthError> {
        let email = normalize_email(&registration.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyRegistered);
        }

        let password_hash = self
            .credentials
            .hash_blocking(registration.password)
            .await?;
        let new_user = NewUser {
            email,
            password_hash,
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            role: Role::default(),
        };

        let user = match self.users.insert(new_user, self.clock.now()).await? {
            InsertOutcome::Created(user) => user,
            // Lost a race with a concurrent registration.
            InsertOutcome::Conflict => return Err(AuthError::EmailAlreadyRegistered),
        };

        let tokens = self.open_session(&user, client).await?;
        self.notifications.enqueue(Notification::new(
            NotificationKind::Welcome,
            &user.email,
            &user.first_name,
        ));
        info!(user_id = %user.id, "user registered");

        Ok(Authenticated { user, tokens })
    }

    /// Redeem a refresh token for a new pair, rotating its session in place.
    ///
    /// # Errors
    /// `Unauthorized` when the token does not verify, is not a refresh token,
    /// or no active session currently holds it.
    #[instrument(skip_all)]
    pub async fn refresh_rotate(
        &self,
        refresh_token: &str,
        client: ClientContext,
    ) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let claims = self
            .codec
            .verify_at(refresh_token, now)
            .map_err(|_| AuthError::Unauthorized)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::Unauthorized);
        }
        let user_id = claims.user_id().map_err(|_| AuthError::Unauthorized)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        let pair = self
            .codec
            .issue_pair_at(user.id, &user.email, user.role, now)
            .map_err(internal)?;
        let rotated = self
            .sessions
            .rotate(
                user.id,
                refresh_token,
                &pair.access_token,
                &pair.refresh_token,
                client.ip,
                client.user_agent,
                now,
            )
            .await?;

        let Some(session) = rotated else {
            warn!(user_id = %user.id, "refresh token matched no active session");
            return Err(AuthError::Unauthorized);
        };
        info!(user_id = %user.id, session_id = %session.id, "session rotated");

        Ok(TokenPair {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: pair.expires_in,
        })
    }

    /// Resolve a bearer access token to the caller.
    ///
    /// # Errors
    /// `ExpiredToken`/`InvalidToken` from the codec, `SessionNotFound` when the
    /// token was logged out or rotated away, `AccountInactive` for a
    /// deactivated account.
    #[instrument(skip_all)]
    pub async fn resolve_identity(&self, access_token: &str) -> Result<Identity, AuthError> {
        let now = self.clock.now();
        let claims = self
            .codec
            .verify_at(access_token, now)
            .map_err(|e| AuthError::from_access_token(&e))?;
        if claims.kind != TokenKind::Access {
            return Err(AuthError::InvalidToken);
        }
        let user_id = claims.user_id().map_err(|_| AuthError::InvalidToken)?;

        let session = self
            .sessions
            .find_active_by_access_token(user_id, access_token, now)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        self.sessions.touch(&session, now).await?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        Ok(Identity {
            id: user.id,
            email: user.email,
            role: user.role,
        })
    }

    /// Deactivate every session of the caller.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    #[instrument(skip_all, fields(user_id = %identity.id))]
    pub async fn logout(&self, identity: &Identity) -> Result<u64, AuthError> {
        let count = self.sessions.deactivate_all(identity.id).await?;
        info!(sessions = count, "logged out everywhere");
        Ok(count)
    }

    /// # Errors
    /// `InvalidCredentials` when `current_password` is wrong.
    #[instrument(skip_all, fields(user_id = %identity.id))]
    pub async fn change_password(
        &self,
        identity: &Identity,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self.load_user(identity.id).await?;
        let verified = self
            .credentials
            .verify_blocking(current_password.to_string(), user.password_hash.clone())
            .await?;
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        let hash = self
            .credentials
            .hash_blocking(new_password.to_string())
            .await?;
        self.users
            .update_password_hash(user.id, &hash, self.clock.now())
            .await?;
        let count = self.sessions.deactivate_all(user.id).await?;

        self.notifications.enqueue(Notification::new(
            NotificationKind::PasswordChanged,
            &user.email,
            &user.first_name,
        ));
        info!(sessions = count, "password changed, sessions revoked");
        Ok(())
    }

    /// Mail a password reset token if `email` belongs to an account.
    ///
    /// Unknown emails are answered exactly like known ones.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    #[instrument(skip_all)]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.users.find_by_email(&normalize_email(email)).await? else {
            info!("password reset requested for unknown email");
            return Ok(());
        };

        let token = self
            .tokens
            .issue(user.id, ActionPurpose::PasswordReset, self.clock.now())
            .await?;
        self.notifications.enqueue(
            Notification::new(
                NotificationKind::PasswordResetRequested,
                &user.email,
                &user.first_name,
            )
            .with_token(token),
        );
        info!(user_id = %user.id, "password reset token issued");
        Ok(())
    }

    /// Spend a reset token and set a new password. Every session of the
    /// account is revoked.
    ///
    /// # Errors
    /// `InvalidActionToken` when the token is unknown, spent or expired.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let now = self.clock.now();
        let user_id = self
            .tokens
            .redeem(ActionPurpose::PasswordReset, token, now)
            .await?
            .ok_or(AuthError::InvalidActionToken)?;
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidActionToken)?;

        let hash = self
            .credentials
            .hash_blocking(new_password.to_string())
            .await?;
        self.users.update_password_hash(user.id, &hash, now).await?;
        let count = self.sessions.deactivate_all(user.id).await?;

        self.notifications.enqueue(Notification::new(
            NotificationKind::PasswordReset,
            &user.email,
            &user.first_name,
        ));
        info!(user_id = %user.id, sessions = count, "password reset, sessions revoked");
        Ok(())
    }

    /// Mail an email verification token to the caller.
    ///
    /// # Errors
    /// `AlreadyVerified` when there is nothing to verify.
    #[instrument(skip_all, fields(user_id = %identity.id))]
    pub async fn send_verification(&self, identity: &Identity) -> Result<(), AuthError> {
        let user = self.load_user(identity.id).await?;
        if user.is_verified {
            return Err(AuthError::AlreadyVerified);
        }

        let token = self
            .tokens
            .issue(user.id, ActionPurpose::EmailVerification, self.clock.now())
            .await?;
        self.notifications.enqueue(
            Notification::new(NotificationKind::VerifyEmail, &user.email, &user.first_name)
                .with_token(token),
        );
        info!("verification token issued");
        Ok(())
    }

    /// # Errors
    /// `InvalidActionToken` when the token is unknown, spent or expired.
    #[instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<UserRecord, AuthError> {
        let now = self.clock.now();
        let user_id = self
            .tokens
            .redeem(ActionPurpose::EmailVerification, token, now)
            .await?
            .ok_or(AuthError::InvalidActionToken)?;
        if !self.users.mark_verified(user_id, now).await? {
            return Err(AuthError::InvalidActionToken);
        }
        info!(user_id = %user_id, "email verified");
        self.load_user(user_id).await
    }

    /// # Errors
    /// `UserNotFound` if the row is gone.
    pub async fn profile(&self, identity: &Identity) -> Result<UserRecord, AuthError> {
        self.load_user(identity.id).await
    }

    /// # Errors
    /// `Internal` on storage failure.
    pub async fn list_sessions(&self, identity: &Identity) -> Result<Vec<Session>, AuthError> {
        Ok(self
            .sessions
            .list_active(identity.id, self.clock.now())
            .await?)
    }

    /// # Errors
    /// `Forbidden` unless `actor` is an admin, `UserNotFound` for an unknown email.
    #[instrument(skip_all, fields(actor = %actor.id, role = %role))]
    pub async fn change_role(
        &self,
        actor: &Identity,
        email: &str,
        role: Role,
    ) -> Result<UserRecord, AuthError> {
        require_role(actor.role, &[Role::Admin])?;
        let user = self
            .users
            .update_role(&normalize_email(email), role, self.clock.now())
            .await?
            .ok_or(AuthError::UserNotFound)?;
        info!(user_id = %user.id, "role changed");
        Ok(user)
    }

    /// Clear a lockout ahead of time.
    ///
    /// # Errors
    /// `Forbidden` below moderator, `UserNotFound` for an unknown email.
    #[instrument(skip_all, fields(actor = %actor.id))]
    pub async fn unlock(&self, actor: &Identity, email: &str) -> Result<(), AuthError> {
        require_role(actor.role, &[Role::Moderator])?;
        let user = self
            .users
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        self.users.clear_lockout(user.id, self.clock.now()).await?;
        info!(user_id = %user.id, "account unlocked");
        Ok(())
    }

    /// Deactivate sessions past expiry. Meant for the background sweeper.
    ///
    /// # Errors
    /// `Internal` on storage failure.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        Ok(self.sessions.purge_expired(self.clock.now()).await?)
    }

    async fn load_user(&self, id: Uuid) -> Result<UserRecord, AuthError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    async fn open_session(
        &self,
        user: &UserRecord,
        client: ClientContext,
    ) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let pair = self
            .codec
            .issue_pair_at(user.id, &user.email, user.role, now)
            .map_err(internal)?;
        let session = self
            .sessions
            .create(
                user.id,
                &pair.access_token,
                &pair.refresh_token,
                client.ip,
                client.user_agent,
                self.codec.refresh_ttl(),
                now,
            )
            .await?;
        info!(user_id = %user.id, session_id = %session.id, "session opened");

        Ok(TokenPair {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: pair.expires_in,
        })
    }
}

impl std::fmt::Debug for AuthSessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSessionService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn internal(err: TokenError) -> AuthError {
    AuthError::Internal(anyhow!(err))
}
