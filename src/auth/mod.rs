//! Authentication and session lifecycle core.
//!
//! `TokenCodec`, `CredentialVerifier`, `LoginGuard` and `SessionStore` are the
//! leaves; `AuthSessionService` drives them for login, registration, refresh
//! rotation, logout and identity resolution. `ActionTokens` backs password
//! reset and email verification.

pub mod action;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod memory;
pub mod notify;
pub mod pg;
pub mod roles;
pub mod service;
pub mod session;
pub mod sweeper;
pub mod token;
pub mod users;

pub use action::{ActionPurpose, ActionToken, ActionTokenRepository, ActionTokens};
pub use config::{AuthConfig, HashCost};
pub use credentials::CredentialVerifier;
pub use error::AuthError;
pub use guard::{LockStatus, LoginGuard};
pub use notify::{LogQueue, Notification, NotificationKind, NotificationQueue, OutboxQueue};
pub use pg::{PgActionTokenRepository, PgSessionRepository, PgUserRepository};
pub use roles::{require_role, Role};
pub use service::{AuthSessionService, ClientContext, Identity, TokenPair};
pub use session::{Session, SessionRepository, SessionStore};
pub use token::{Claims, TokenCodec, TokenError, TokenKind};
pub use users::{InsertOutcome, NewUser, UserRecord, UserRepository};

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Source of "now" for every time-dependent decision in the core.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map_or_else(|_| Utc::now(), |now| *now)
    }
}
