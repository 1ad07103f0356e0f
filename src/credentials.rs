//! Password verification against stored argon2 hashes.
//!
//! Vigil does not own credentials; it only reads `users.password_hash` (a PHC
//! string) and tells the caller whether the supplied password matches.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::Instrument;

use crate::attempts::normalize_account_key;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
    UnknownAccount,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Check `secret` for `account_key`.
    ///
    /// # Errors
    /// Returns an error on storage failures or unreadable stored hashes.
    async fn verify(&self, account_key: &str, secret: &SecretString) -> Result<Verification>;
}

/// Hash a password into a PHC string suitable for `users.password_hash`.
///
/// # Errors
/// Returns an error if the argon2 parameters are rejected.
pub fn hash_password(password: &str, params: Params) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Compare a password with a PHC string; parameters come from the hash itself.
fn verify_hash(phc: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|e| anyhow!("invalid stored password hash: {e}"))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("failed to verify password: {e}")),
    }
}

async fn verify_blocking(phc: String, secret: &SecretString) -> Result<Verification> {
    let password = secret.expose_secret().to_string();
    let matches = tokio::task::spawn_blocking(move || verify_hash(&phc, &password))
        .await
        .context("password verification task failed")??;

    Ok(if matches {
        Verification::Valid
    } else {
        Verification::Invalid
    })
}

#[derive(Clone, Debug)]
pub struct PgCredentialVerifier {
    pool: PgPool,
}

impl PgCredentialVerifier {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn password_hash(&self, email: &str) -> Result<Option<String>> {
        let query = "SELECT password_hash FROM users WHERE lower(email) = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup password hash")?;

        Ok(row.map(|row| row.get("password_hash")))
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn verify(&self, account_key: &str, secret: &SecretString) -> Result<Verification> {
        let email = normalize_account_key(account_key);
        match self.password_hash(&email).await? {
            Some(phc) => verify_blocking(phc, secret).await,
            None => Ok(Verification::UnknownAccount),
        }
    }
}

/// Fixed set of accounts held in memory, for tests and local runs.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialVerifier {
    hashes: HashMap<String, String>,
}

impl MemoryCredentialVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account with an already hashed password.
    #[must_use]
    pub fn with_account(mut self, email: &str, password_hash: String) -> Self {
        self.hashes
            .insert(normalize_account_key(email), password_hash);
        self
    }
}

#[async_trait]
impl CredentialVerifier for MemoryCredentialVerifier {
    async fn verify(&self, account_key: &str, secret: &SecretString) -> Result<Verification> {
        match self.hashes.get(&normalize_account_key(account_key)) {
            Some(phc) => verify_blocking(phc.clone(), secret).await,
            None => Ok(Verification::UnknownAccount),
        }
    }
}

/// Cheap argon2 parameters so tests don't spend seconds hashing.
#[cfg(test)]
pub(crate) fn test_params() -> Params {
    Params::new(1024, 1, 1, None).unwrap_or_default()
}
