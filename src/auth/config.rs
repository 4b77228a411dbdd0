//! Immutable configuration for the authentication core.
//!
//! Built once at process start from CLI/env values and handed to every
//! component constructor.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

const DEFAULT_ISSUER: &str = "authcore";
const DEFAULT_AUDIENCE: &str = "authcore-clients";
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_SECONDS: u64 = 3 * 60;
const DEFAULT_SESSION_PURGE_SECONDS: u64 = 10 * 60;
const DEFAULT_ACTION_TOKEN_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Minimum HMAC key length (256 bits).
pub const MIN_SECRET_BYTES: usize = 32;

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        // OWASP recommended baseline for Argon2id.
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    lockout_threshold: u32,
    lockout_duration: Duration,
    hash_cost: HashCost,
    session_purge_interval: Duration,
    action_token_ttl: Duration,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_duration: Duration::from_secs(DEFAULT_LOCKOUT_SECONDS),
            hash_cost: HashCost::default(),
            session_purge_interval: Duration::from_secs(DEFAULT_SESSION_PURGE_SECONDS),
            action_token_ttl: Duration::from_secs(DEFAULT_ACTION_TOKEN_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_token_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_token_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.lockout_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: u64) -> Self {
        self.lockout_duration = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_hash_cost(mut self, cost: HashCost) -> Self {
        self.hash_cost = cost;
        self
    }

    #[must_use]
    pub fn with_session_purge_seconds(mut self, seconds: u64) -> Self {
        self.session_purge_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_action_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.action_token_ttl = Duration::from_secs(seconds);
        self
    }

    pub(crate) fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.expose_secret().as_bytes()
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn hash_cost(&self) -> HashCost {
        self.hash_cost
    }

    /// Zero disables the background sweeper.
    #[must_use]
    pub fn session_purge_interval(&self) -> Duration {
        self.session_purge_interval
    }

    /// Lifetime of password reset and email verification tokens.
    #[must_use]
    pub fn action_token_ttl(&self) -> Duration {
        self.action_token_ttl
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"***")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("lockout_threshold", &self.lockout_threshold)
            .field("lockout_duration", &self.lockout_duration)
            .field("hash_cost", &self.hash_cost)
            .field("session_purge_interval", &self.session_purge_interval)
            .field("action_token_ttl", &self.action_token_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("0123456789abcdef0123456789abcdef")
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new(secret());

        assert_eq!(config.issuer(), DEFAULT_ISSUER);
        assert_eq!(config.audience(), DEFAULT_AUDIENCE);
        assert_eq!(config.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(604_800));
        assert_eq!(config.lockout_threshold(), 5);
        assert_eq!(config.lockout_duration(), Duration::from_secs(180));
        assert_eq!(config.action_token_ttl(), Duration::from_secs(86_400));

        let config = config
            .with_issuer("api.test".to_string())
            .with_audience("web.test".to_string())
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(120)
            .with_lockout_threshold(3)
            .with_lockout_seconds(30)
            .with_session_purge_seconds(0)
            .with_action_token_ttl_seconds(600);

        assert_eq!(config.issuer(), "api.test");
        assert_eq!(config.audience(), "web.test");
        assert_eq!(config.access_token_ttl(), Duration::from_secs(60));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(120));
        assert_eq!(config.lockout_threshold(), 3);
        assert_eq!(config.lockout_duration(), Duration::from_secs(30));
        assert!(config.session_purge_interval().is_zero());
        assert_eq!(config.action_token_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn lockout_threshold_never_zero() {
        let config = AuthConfig::new(secret()).with_lockout_threshold(0);
        assert_eq!(config.lockout_threshold(), 1);
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AuthConfig::new(secret());
        let debug = format!("{config:?}");
        assert!(debug.contains("***"));
        assert!(!debug.contains("0123456789abcdef"));
    }
}
