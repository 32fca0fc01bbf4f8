// ABOUTME: Signing key store with rotation and a retention window for retired keys
// ABOUTME: Newest key signs; every unexpired key verifies, matching kid first
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Length of generated HMAC secrets
const GENERATED_SECRET_LEN: usize = 64;
/// Shortest secret accepted from configuration
const MIN_SECRET_LEN: usize = 32;

/// One HMAC signing key
pub struct SigningKey {
    kid: String,
    secret: Zeroizing<Vec<u8>>,
    created_at: DateTime<Utc>,
}

impl SigningKey {
    fn new(secret: Zeroizing<Vec<u8>>) -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            kid: format!("key_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]),
            secret,
            created_at: now,
        }
    }

    /// Key id written to the token header
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// When the key was created
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Key for signing
    #[must_use]
    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }

    /// Key for verification
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

struct KeySlot {
    key: Arc<SigningKey>,
    retired_at: Option<DateTime<Utc>>,
}

/// Holds the signing keys; shared read-only by every request
pub struct SecretStore {
    // newest last
    slots: RwLock<Vec<KeySlot>>,
    retention: Duration,
}

impl SecretStore {
    /// Create a store with a freshly generated key
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails
    pub fn generate(retention: Duration) -> AppResult<Self> {
        Ok(Self::with_key(generate_secret()?, retention))
    }

    /// Create a store from configured key material
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secret is shorter than 32 bytes
    pub fn from_secret(secret: &[u8], retention: Duration) -> AppResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AppError::config(format!(
                "Signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self::with_key(Zeroizing::new(secret.to_vec()), retention))
    }

    fn with_key(secret: Zeroizing<Vec<u8>>, retention: Duration) -> Self {
        let key = Arc::new(SigningKey::new(secret));
        info!(kid = %key.kid, "Signing key initialized");
        Self {
            slots: RwLock::new(vec![KeySlot {
                key,
                retired_at: None,
            }]),
            retention,
        }
    }

    /// Key that signs new tokens
    ///
    /// # Errors
    ///
    /// Returns an internal error if the key list lock is poisoned or empty
    pub fn active(&self) -> AppResult<Arc<SigningKey>> {
        let slots = self.slots.read().map_err(|_| lock_poisoned())?;
        slots
            .last()
            .map(|slot| slot.key.clone())
            .ok_or_else(|| AppError::internal("No active signing key"))
    }

    /// Keys to try when verifying, the one named by `kid` first
    ///
    /// Retired keys past the retention window are skipped.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the key list lock is poisoned
    pub fn verification_keys(&self, kid: Option<&str>) -> AppResult<Vec<Arc<SigningKey>>> {
        self.verification_keys_at(kid, Utc::now())
    }

    /// [`Self::verification_keys`] as of `now`
    ///
    /// # Errors
    ///
    /// Returns an internal error if the key list lock is poisoned
    pub fn verification_keys_at(
        &self,
        kid: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Arc<SigningKey>>> {
        let slots = self.slots.read().map_err(|_| lock_poisoned())?;
        let mut keys: Vec<Arc<SigningKey>> = slots
            .iter()
            .rev()
            .filter(|slot| slot.retired_at.is_none_or(|at| at + self.retention > now))
            .map(|slot| slot.key.clone())
            .collect();
        drop(slots);

        if let Some(kid) = kid {
            if let Some(pos) = keys.iter().position(|key| key.kid == kid) {
                let matched = keys.remove(pos);
                keys.insert(0, matched);
            }
        }
        Ok(keys)
    }

    /// Add a new newest key; the previous one keeps verifying for the retention window
    ///
    /// Returns the new key id.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails or the lock is poisoned
    pub fn rotate(&self) -> AppResult<String> {
        let key = Arc::new(SigningKey::new(generate_secret()?));
        let kid = key.kid.clone();
        let now = Utc::now();

        let mut slots = self.slots.write().map_err(|_| lock_poisoned())?;
        if let Some(current) = slots.last_mut() {
            current.retired_at = Some(now);
        }
        let retention = self.retention;
        slots.retain(|slot| slot.retired_at.is_none_or(|at| at + retention > now));
        slots.push(KeySlot {
            key,
            retired_at: None,
        });
        let retained = slots.len();
        drop(slots);

        info!(kid = %kid, retained_keys = retained, "Signing key rotated");
        Ok(kid)
    }
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

fn lock_poisoned() -> AppError {
    AppError::internal("Signing key lock poisoned")
}

/// Generate a random 64-byte signing secret
///
/// # Errors
///
/// Returns an error if the system RNG fails; the service cannot sign securely without it
pub fn generate_secret() -> AppResult<Zeroizing<Vec<u8>>> {
    let rng = SystemRandom::new();
    let mut secret = Zeroizing::new(vec![0u8; GENERATED_SECRET_LEN]);

    rng.fill(&mut secret).map_err(|e| {
        error!(
            "CRITICAL: Failed to generate cryptographically secure signing secret: {}",
            e
        );
        AppError::internal("System RNG failure - cannot generate secure signing secret")
    })?;

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_secret() {
        assert!(SecretStore::from_secret(&[7u8; 16], Duration::hours(1)).is_err());
    }

    #[test]
    fn test_rotation_keeps_previous_key_for_verification() {
        let store = SecretStore::generate(Duration::hours(1)).unwrap();
        let old = store.active().unwrap();
        let new_kid = store.rotate().unwrap();

        assert_eq!(store.active().unwrap().kid(), new_kid);
        let keys = store.verification_keys(Some(old.kid())).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].kid(), old.kid());
    }

    #[test]
    fn test_default_retention_outlasts_api_key_lifetime() {
        let config = crate::config::AuthConfig::default();
        let store = SecretStore::generate(config.key_retention()).unwrap();
        let old = store.active().unwrap();
        store.rotate().unwrap();

        // An API key signed just before rotation, checked a day before it expires
        let late = Utc::now() + config.ttl.api_key() - Duration::days(1);
        let keys = store.verification_keys_at(Some(old.kid()), late).unwrap();
        assert_eq!(keys[0].kid(), old.kid());

        let after = Utc::now() + config.key_retention() + Duration::days(1);
        let keys = store.verification_keys_at(Some(old.kid()), after).unwrap();
        assert!(keys.iter().all(|key| key.kid() != old.kid()));
    }

    #[test]
    fn test_retired_keys_pruned_after_retention() {
        let store = SecretStore::generate(Duration::zero()).unwrap();
        let old = store.active().unwrap();
        store.rotate().unwrap();
        let keys = store.verification_keys(Some(old.kid())).unwrap();
        assert_eq!(keys.len(), 1);
        assert_ne!(keys[0].kid(), old.kid());
    }
}
