//! Argon2id password hashing.
//!
//! Hashing and verification are CPU bound; the async wrappers move them onto
//! the blocking pool so request tasks keep the runtime free.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use super::config::HashCost;

#[derive(Clone, Debug)]
pub struct CredentialVerifier {
    params: Params,
}

impl CredentialVerifier {
    /// # Errors
    /// Returns an error if the cost parameters are out of range.
    pub fn new(cost: HashCost) -> Result<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self { params })
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `plaintext` into a PHC string with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!("failed to hash password: {e}"))
    }

    /// Constant-time compare of `plaintext` against a stored PHC hash.
    /// Unparseable hashes never verify.
    #[must_use]
    pub fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        // Parameters embedded in the stored hash win over the configured ones.
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// # Errors
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn hash_blocking(&self, plaintext: String) -> Result<String> {
        let verifier = self.clone();
        tokio::task::spawn_blocking(move || verifier.hash(&plaintext))
            .await
            .context("password hashing task failed")?
    }

    /// # Errors
    /// Returns an error if the blocking task panics.
    pub async fn verify_blocking(&self, plaintext: String, hash: String) -> Result<bool> {
        let verifier = self.clone();
        tokio::task::spawn_blocking(move || verifier.verify(&plaintext, &hash))
            .await
            .context("password verification task failed")
    }
}
