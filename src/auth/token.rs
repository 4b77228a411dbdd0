//! Signed access and refresh tokens.
//!
//! Tokens are compact HS256 JWTs carrying `{sub, email, role, type, exp, iat,
//! nbf, jti, iss, aud}`. The codec is stateless and safe to share across tasks.

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    config::{AuthConfig, MIN_SECRET_BYTES},
    roles::Role,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    /// Subject as a user id.
    ///
    /// # Errors
    /// Returns `TokenError::Malformed` when `sub` is not a UUID.
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Malformed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("malformed token")]
    Malformed,
    #[error("wrong token audience or issuer")]
    WrongAudienceOrIssuer,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// # Errors
    /// Returns an error if the signing secret is shorter than 32 bytes.
    pub fn new(config: &AuthConfig) -> anyhow::Result<Self> {
        let secret = config.jwt_secret();
        if secret.len() < MIN_SECRET_BYTES {
            anyhow::bail!("JWT secret must be at least {MIN_SECRET_BYTES} bytes");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer()]);
        validation.set_audience(&[config.audience()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);
        // Time checks run against the caller's clock in `verify_at`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer().to_string(),
            audience: config.audience().to_string(),
            access_ttl: config.access_token_ttl(),
            refresh_ttl: config.refresh_token_ttl(),
        })
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        role: Role,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.issue_at(user_id, email, role, kind, ttl, Utc::now())
    }

    /// Issue a token as of `now`. Every call gets a fresh `jti`.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        email: &str,
        role: Role,
        kind: TokenKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let ttl = i64::try_from(ttl.as_secs()).map_err(|e| TokenError::Signing(e.to_string()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            kind,
            exp: iat.saturating_add(ttl),
            iat,
            nbf: iat,
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        self.encode_claims(&claims)
    }

    /// Issue an access/refresh pair with the configured lifetimes.
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if encoding fails.
    pub fn issue_pair_at(
        &self,
        user_id: Uuid,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<IssuedPair, TokenError> {
        Ok(IssuedPair {
            access_token: self.issue_at(
                user_id,
                email,
                role,
                TokenKind::Access,
                self.access_ttl,
                now,
            )?,
            refresh_token: self.issue_at(
                user_id,
                email,
                role,
                TokenKind::Refresh,
                self.refresh_ttl,
                now,
            )?,
            expires_in: self.access_ttl.as_secs(),
        })
    }

    pub(crate) fn encode_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// # Errors
    /// See [`TokenCodec::verify_at`].
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Check signature, issuer, audience, required claims, then expiry and
    /// not-before against `now`. A token is expired once `now >= exp`.
    ///
    /// # Errors
    /// Returns the first failed check as a `TokenError`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                    TokenError::WrongAudienceOrIssuer
                }
                _ => TokenError::Malformed,
            }
        })?;

        let claims = data.claims;
        let now = now.timestamp();
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if now < claims.nbf {
            return Err(TokenError::Malformed);
        }

        Ok(claims)
    }

    /// Kind of a valid token, `None` if it does not verify.
    #[must_use]
    pub fn kind_of(&self, token: &str) -> Option<TokenKind> {
        self.verify(token).ok().map(|claims| claims.kind)
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use secrecy::SecretString;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn codec() -> TokenCodec {
        let config = AuthConfig::new(SecretString::from(SECRET))
            .with_issuer("authcore.test".to_string())
            .with_audience("clients.test".to_string());
        match TokenCodec::new(&config) {
            Ok(codec) => codec,
            Err(err) => panic!("codec: {err}"),
        }
    }

    #[test]
    fn rejects_short_secret() {
        let config = AuthConfig::new(SecretString::from("short"));
        assert!(TokenCodec::new(&config).is_err());
    }

    #[test]
    fn access_token_round_trip() -> Result<(), TokenError> {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let token = codec.issue(
            user_id,
            "alice@example.com",
            Role::Moderator,
            TokenKind::Access,
            Duration::from_secs(900),
        )?;

        let claims = codec.verify(&token)?;
        assert_eq!(claims.user_id()?, user_id);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, Role::Moderator);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.iss, "authcore.test");
        assert_eq!(claims.aud, "clients.test");
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(codec.kind_of(&token), Some(TokenKind::Access));
        Ok(())
    }

    #[test]
    fn identical_inputs_get_distinct_token_ids() -> Result<(), TokenError> {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        let first = codec.issue_at(user_id, "a@b.c", Role::User, TokenKind::Refresh, ttl, now)?;
        let second = codec.issue_at(user_id, "a@b.c", Role::User, TokenKind::Refresh, ttl, now)?;

        assert_ne!(first, second);
        assert_ne!(codec.verify(&first)?.jti, codec.verify(&second)?.jti);
        Ok(())
    }

    #[test]
    fn zero_ttl_is_expired() -> Result<(), TokenError> {
        let codec = codec();
        let token = codec.issue(
            Uuid::new_v4(),
            "a@b.c",
            Role::User,
            TokenKind::Access,
            Duration::ZERO,
        )?;
        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
        assert_eq!(codec.kind_of(&token), None);
        Ok(())
    }

    #[test]
    fn expires_after_ttl_elapses() -> Result<(), TokenError> {
        let codec = codec();
        let now = Utc::now();
        let token = codec.issue_at(
            Uuid::new_v4(),
            "a@b.c",
            Role::User,
            TokenKind::Access,
            Duration::from_secs(900),
            now,
        )?;
        assert!(codec
            .verify_at(&token, now + ChronoDuration::seconds(899))
            .is_ok());
        assert_eq!(
            codec.verify_at(&token, now + ChronoDuration::seconds(900)),
            Err(TokenError::Expired)
        );
        Ok(())
    }

    #[test]
    fn wrong_secret_is_invalid_signature() -> Result<(), TokenError> {
        let token = codec().issue(
            Uuid::new_v4(),
            "a@b.c",
            Role::User,
            TokenKind::Access,
            Duration::from_secs(60),
        )?;
        let other = AuthConfig::new(SecretString::from(
            "another-secret-that-is-at-least-32-bytes",
        ))
        .with_issuer("authcore.test".to_string())
        .with_audience("clients.test".to_string());
        let other = TokenCodec::new(&other).map_err(|e| TokenError::Signing(e.to_string()))?;

        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
        Ok(())
    }

    #[test]
    fn foreign_issuer_or_audience_is_rejected() -> Result<(), TokenError> {
        let codec = codec();
        let now = Utc::now().timestamp();
        let mut claims = Claims {
            sub: Uuid::new_v4().to_string(),
            email: "a@b.c".to_string(),
            role: Role::User,
            kind: TokenKind::Access,
            exp: now + 60,
            iat: now,
            nbf: now,
            jti: Uuid::new_v4().to_string(),
            iss: "someone-else".to_string(),
            aud: "clients.test".to_string(),
        };
        let token = codec.encode_claims(&claims)?;
        assert_eq!(codec.verify(&token), Err(TokenError::WrongAudienceOrIssuer));

        claims.iss = "authcore.test".to_string();
        claims.aud = "other-clients".to_string();
        let token = codec.encode_claims(&claims)?;
        assert_eq!(codec.verify(&token), Err(TokenError::WrongAudienceOrIssuer));
        Ok(())
    }

    #[test]
    fn garbage_and_unknown_role_are_malformed() -> Result<(), TokenError> {
        let codec = codec();
        assert_eq!(codec.verify("not-a-token"), Err(TokenError::Malformed));

        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": Uuid::new_v4().to_string(),
            "email": "a@b.c",
            "role": "root",
            "type": "access",
            "exp": now + 60,
            "iat": now,
            "nbf": now,
            "jti": Uuid::new_v4().to_string(),
            "iss": "authcore.test",
            "aud": "clients.test",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;
        assert_eq!(codec.verify(&token), Err(TokenError::Malformed));
        Ok(())
    }

    #[test]
    fn missing_claim_is_malformed() -> Result<(), TokenError> {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": Uuid::new_v4().to_string(),
            "role": "user",
            "type": "access",
            "exp": now + 60,
            "iat": now,
            "nbf": now,
            "iss": "authcore.test",
            "aud": "clients.test",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;
        assert_eq!(codec.verify(&token), Err(TokenError::Malformed));
        Ok(())
    }

    #[test]
    fn pair_uses_distinct_kinds_and_lifetimes() -> Result<(), TokenError> {
        let codec = codec();
        let now = Utc::now();
        let pair = codec.issue_pair_at(Uuid::new_v4(), "a@b.c", Role::User, now)?;

        let access = codec.verify(&pair.access_token)?;
        let refresh = codec.verify(&pair.refresh_token)?;
        assert_eq!(access.kind, TokenKind::Access);
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert_eq!(access.exp - access.iat, 900);
        assert_eq!(refresh.exp - refresh.iat, 604_800);
        assert_eq!(pair.expires_in, 900);
        Ok(())
    }
}
