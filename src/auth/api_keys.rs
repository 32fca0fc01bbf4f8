// ABOUTME: Organization-scoped API key tokens carrying their scopes and caller restrictions as claims
// ABOUTME: Each key has at most one live signed value; reissuing revokes the previous one first
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # API Key Tokens
//!
//! An API key record lives with the organization; what callers present is a
//! signed token for that key. The cache keeps a pointer to the key's current
//! token id: a reissue revokes the value it points at, and verification accepts
//! only the value it points at.

use super::codec::{ClaimSet, IssuedToken, TokenCodec, TokenKind};
use super::revocation::RevocationRegistry;
use crate::cache::{Cache, CacheKey, CacheProvider};
use crate::errors::{AppError, AppResult};
use crate::models::Id;
use chrono::{DateTime, Duration, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Reissue attempts before giving up on a contended key
const MAX_REISSUE_ATTEMPTS: usize = 5;

/// Where a key may be used from; empty lists allow everything
///
/// Entries are glob patterns, e.g. `10.0.*` or `https://*.example.com/*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRestrictions {
    /// Caller IP patterns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_ips: Vec<String>,
    /// HTTP referrer patterns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_referrers: Vec<String>,
}

impl ApiKeyRestrictions {
    /// Whether nothing is restricted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed_ips.is_empty() && self.allowed_referrers.is_empty()
    }

    /// Reject patterns that do not parse
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first bad pattern
    pub fn validate(&self) -> AppResult<()> {
        for pattern in self.allowed_ips.iter().chain(&self.allowed_referrers) {
            Pattern::new(pattern).map_err(|e| {
                AppError::invalid_input(format!("Invalid restriction pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

fn matches_any(patterns: &[String], value: &str) -> bool {
    patterns.is_empty()
        || patterns
            .iter()
            .any(|pattern| Pattern::new(pattern).is_ok_and(|p| p.matches(value)))
}

/// Verified API key token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyGrant {
    /// Logical API key
    pub key_id: Id,
    /// Owning organization
    pub organization_id: Id,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Caller restrictions
    pub restrictions: ApiKeyRestrictions,
    /// Presented token id
    pub token_id: String,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

impl ApiKeyGrant {
    /// Whether `scope` was granted (`*` grants everything)
    #[must_use]
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == "*" || granted == scope)
    }

    /// Whether every requested scope was granted
    #[must_use]
    pub fn allows_all<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        requested.iter().all(|scope| self.allows_scope(scope.as_ref()))
    }

    /// Whether a call from `ip` is permitted
    #[must_use]
    pub fn permits_ip(&self, ip: &str) -> bool {
        matches_any(&self.restrictions.allowed_ips, ip)
    }

    /// Whether a call with this referrer is permitted; a missing referrer only passes when unrestricted
    #[must_use]
    pub fn permits_referrer(&self, referrer: Option<&str>) -> bool {
        match referrer {
            Some(referrer) => matches_any(&self.restrictions.allowed_referrers, referrer),
            None => self.restrictions.allowed_referrers.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CurrentKeyToken {
    token_id: String,
    expires_at: i64,
}

impl CurrentKeyToken {
    fn remaining(&self) -> Duration {
        DateTime::from_timestamp(self.expires_at, 0)
            .map_or_else(Duration::zero, |at| (at - Utc::now()).max(Duration::zero()))
    }
}

/// Signs and verifies API key tokens
#[derive(Clone)]
pub struct ApiKeyTokenIssuer {
    codec: TokenCodec,
    revocations: RevocationRegistry,
    cache: Cache,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl ApiKeyTokenIssuer {
    /// Create the issuer
    ///
    /// `max_ttl` is the signing key retention: a longer-lived value would stop
    /// verifying once its key is rotated out.
    #[must_use]
    pub const fn new(
        codec: TokenCodec,
        revocations: RevocationRegistry,
        cache: Cache,
        default_ttl: Duration,
        max_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            revocations,
            cache,
            default_ttl,
            max_ttl,
        }
    }

    /// Sign a new value for `key_id`, revoking whatever value it had
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a bad restriction pattern or a lifetime that is
    /// not positive or outlives key retention, or an internal error if concurrent
    /// reissues keep winning
    pub async fn issue(
        &self,
        key_id: Id,
        organization_id: Id,
        scopes: Vec<String>,
        restrictions: ApiKeyRestrictions,
        ttl: Option<Duration>,
    ) -> AppResult<IssuedToken> {
        restrictions.validate()?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl > self.max_ttl {
            return Err(AppError::invalid_input(format!(
                "API key lifetime may not exceed {} days",
                self.max_ttl.num_days()
            )));
        }
        let pointer_ttl = ttl
            .to_std()
            .map_err(|_| AppError::invalid_input("API key lifetime must be positive"))?;
        let pointer = CacheKey::ApiKeyCurrent { key_id };

        for _ in 0..MAX_REISSUE_ATTEMPTS {
            let previous: Option<CurrentKeyToken> = self.cache.get(&pointer).await?;
            if let Some(previous) = &previous {
                self.revocations
                    .revoke(&previous.token_id, previous.remaining())
                    .await?;
            }

            let issued = self.codec.issue(
                ClaimSet::for_subject(&key_id)
                    .with_organization(&organization_id)
                    .with_scopes(scopes.clone())
                    .with_restrictions(restrictions.clone()),
                TokenKind::ApiKey,
                ttl,
            )?;
            let current = CurrentKeyToken {
                token_id: issued.claims.jti.clone(),
                expires_at: issued.claims.exp,
            };

            let installed = match &previous {
                Some(previous) => {
                    self.cache
                        .compare_and_swap(&pointer, previous, &current, pointer_ttl)
                        .await?
                }
                None => {
                    self.cache
                        .set_if_absent(&pointer, &current, pointer_ttl)
                        .await?
                }
            };
            if installed {
                info!(
                    key_id = %key_id,
                    organization_id = %organization_id,
                    replaced = previous.is_some(),
                    "API key token issued"
                );
                return Ok(issued);
            }

            // Another reissue got in first; this value never became current
            debug!(key_id = %key_id, "concurrent API key reissue, retrying");
            self.revocations.revoke(&issued.claims.jti, ttl).await?;
        }

        warn!(key_id = %key_id, "API key reissue did not settle");
        Err(AppError::internal("API key reissue is contended"))
    }

    /// Verify an API key token
    ///
    /// The token must be the key's current value as well as unrevoked, so a
    /// lost revocation marker cannot bring a replaced value back.
    /// Scope and restriction checks are the caller's job, through [`ApiKeyGrant`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn verify(&self, token: &str) -> AppResult<ApiKeyGrant> {
        let claims = self.codec.verify(token, TokenKind::ApiKey)?;
        if self.revocations.is_revoked(&claims.jti).await? {
            debug!(jti = %claims.jti, "revoked API key token presented");
            return Err(AppError::revoked("API key token has been revoked"));
        }
        let key_id = claims.subject_id()?;
        let current: Option<CurrentKeyToken> =
            self.cache.get(&CacheKey::ApiKeyCurrent { key_id }).await?;
        if current.is_none_or(|current| current.token_id != claims.jti) {
            debug!(key_id = %key_id, jti = %claims.jti, "superseded API key token presented");
            return Err(AppError::revoked("API key token is no longer current"));
        }

        let organization_id = claims
            .org
            .as_deref()
            .map(Id::from_external)
            .transpose()
            .map_err(|_| AppError::invalid_token("API key token organization is not an id"))?
            .ok_or_else(|| AppError::invalid_token("API key token carries no organization"))?;

        Ok(ApiKeyGrant {
            key_id,
            organization_id,
            expires_at: claims.expires_at(),
            scopes: claims.scopes,
            restrictions: claims.rst.unwrap_or_default(),
            token_id: claims.jti,
        })
    }

    /// Revoke the current value of a key; returns whether one was live
    ///
    /// # Errors
    ///
    /// Returns a cache error
    pub async fn revoke(&self, key_id: Id) -> AppResult<bool> {
        let current: Option<CurrentKeyToken> = self
            .cache
            .take(&CacheKey::ApiKeyCurrent { key_id })
            .await?;
        let Some(current) = current else {
            return Ok(false);
        };
        self.revocations
            .revoke(&current.token_id, current.remaining())
            .await?;
        info!(key_id = %key_id, "API key token revoked");
        Ok(true)
    }
}
