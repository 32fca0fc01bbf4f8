// ABOUTME: Argon2id hashing for passwords and backup codes, and the uniform-time credential check
// ABOUTME: Hashing runs on the blocking pool; unknown identifiers are checked against a dummy hash
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::config::PasswordHashConfig;
use crate::constants::credentials::MIN_PASSWORD_LEN;
use crate::errors::{AppError, AppResult};
use crate::models::user::normalize_email;
use crate::models::Id;
use crate::store::UserStore;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordVerifier, Version};
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{debug, warn};

const DUMMY_SECRET: &str = "gatehouse-dummy-credential";

/// Argon2id hasher with configured cost
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    // Hash of a throwaway secret with the same cost, compared against when no user matches
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    /// Build a hasher and precompute its dummy hash
    ///
    /// # Errors
    ///
    /// Returns a config error if the cost parameters are rejected by argon2
    pub fn new(config: PasswordHashConfig) -> AppResult<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            Some(32),
        )
        .map_err(|e| AppError::config(format!("invalid argon2 parameters: {e}")))?;
        let dummy_hash = hash_with(&params, DUMMY_SECRET)?;
        Ok(Self {
            params,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    /// Hash a secret into a PHC string
    ///
    /// # Errors
    ///
    /// Returns an internal error if hashing fails or the blocking task is cancelled
    pub async fn hash(&self, secret: &str) -> AppResult<String> {
        let params = self.params.clone();
        let secret = secret.to_owned();
        tokio::task::spawn_blocking(move || hash_with(&params, &secret))
            .await
            .map_err(|e| AppError::internal(format!("password hashing task failed: {e}")))?
    }

    /// Compare a secret against a stored PHC hash
    ///
    /// # Errors
    ///
    /// Returns an internal error if the stored hash is unparseable or the blocking task fails
    pub async fn verify(&self, secret: &str, stored_hash: &str) -> AppResult<bool> {
        let secret = secret.to_owned();
        let stored_hash = stored_hash.to_owned();
        tokio::task::spawn_blocking(move || verify_with(&secret, &stored_hash))
            .await
            .map_err(|e| AppError::internal(format!("password verification task failed: {e}")))?
    }

    /// Spend the same work as a real comparison and discard the result
    pub async fn verify_dummy(&self, secret: &str) {
        if let Err(e) = self.verify(secret, &self.dummy_hash).await {
            warn!(error = %e, "dummy hash verification failed unexpectedly");
        }
    }
}

fn hash_with(params: &Params, secret: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone());
    argon2::PasswordHasher::hash_password(&argon2, secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

fn verify_with(secret: &str, stored_hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::internal(format!("stored password hash is invalid: {e}")))?;
    // Cost parameters come from the PHC string, not from the current config
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

/// Check password policy
///
/// # Errors
///
/// Returns `InvalidInput` if the password is too short
pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::invalid_input(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Outcome of a successful password check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedCredentials {
    /// Matched user
    pub user_id: Id,
    /// Whether a second factor must be presented before tokens are issued
    pub requires_two_factor: bool,
}

/// Verifies identifier and password pairs without revealing which one was wrong
#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserStore>,
    hasher: PasswordHasher,
}

impl CredentialVerifier {
    /// Create a verifier over the user store
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, hasher: PasswordHasher) -> Self {
        Self { users, hasher }
    }

    /// Check a password for the account `identifier` names
    ///
    /// A hash comparison runs whether or not the account exists.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for an unknown identifier or wrong password,
    /// or a store error if the lookup fails
    pub async fn verify(&self, identifier: &str, password: &str) -> AppResult<VerifiedCredentials> {
        let email = normalize_email(identifier);
        let Some(user) = self.users.get_user_by_email(&email).await? else {
            self.hasher.verify_dummy(password).await;
            debug!("credential check for unknown identifier");
            return Err(AppError::invalid_credentials());
        };

        if !self.hasher.verify(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "password mismatch");
            return Err(AppError::invalid_credentials());
        }

        Ok(VerifiedCredentials {
            user_id: user.id,
            requires_two_factor: user.two_factor_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_verifies_only_its_own_secret() {
        let hasher = PasswordHasher::new(PasswordHashConfig::minimal()).unwrap();
        let hash = hasher.hash("correct horse").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash).await.unwrap());
        assert!(!hasher.verify("battery staple", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage_hash() {
        let hasher = PasswordHasher::new(PasswordHashConfig::minimal()).unwrap();
        assert!(hasher.verify("anything", "not-a-phc-string").await.is_err());
    }

    #[test]
    fn test_password_policy() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }
}
