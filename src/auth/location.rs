// ABOUTME: New-location detection by client fingerprint and out-of-band approval of unknown locations
// ABOUTME: Approval tokens are single-use and carry the fingerprint hash they approve
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::codec::{ClaimSet, IssuedToken, TokenKind};
use super::single_use::SingleUseTokens;
use crate::errors::{AppError, AppResult};
use crate::models::Id;
use crate::store::UserStore;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Hex SHA-256 over the client IP and user agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive from the client's address and user agent
    #[must_use]
    pub fn derive(ip: &str, user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(b"\n");
        hasher.update(user_agent.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a hash read back from a token claim
    #[must_use]
    pub fn from_hash(hash: String) -> Self {
        Self(hash)
    }

    /// Hex form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a login comes from a location the user has used before
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintStatus {
    /// Seen before, or trusted on first use
    Known,
    /// Needs approval or a notice
    Unknown,
}

/// Tracks known fingerprints and approves new ones
#[derive(Clone)]
pub struct SessionApprovalManager {
    users: Arc<dyn UserStore>,
    tokens: SingleUseTokens,
    ttl: Duration,
}

impl SessionApprovalManager {
    /// Create the manager
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, tokens: SingleUseTokens, ttl: Duration) -> Self {
        Self { users, tokens, ttl }
    }

    /// Classify a fingerprint for a user
    ///
    /// A user with no recorded fingerprints trusts this one and records it.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown user, or a store error
    pub async fn check_fingerprint(
        &self,
        user_id: Id,
        fingerprint: &Fingerprint,
    ) -> AppResult<FingerprintStatus> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        if user.known_fingerprints.is_empty() {
            self.users
                .add_known_fingerprint(user_id, fingerprint.as_str())
                .await?;
            info!(user_id = %user_id, "first fingerprint trusted on first use");
            return Ok(FingerprintStatus::Known);
        }

        if user.knows_fingerprint(fingerprint.as_str()) {
            Ok(FingerprintStatus::Known)
        } else {
            info!(user_id = %user_id, "login from unrecognized location");
            Ok(FingerprintStatus::Unknown)
        }
    }

    /// Issue the approval token to be emailed to the user
    ///
    /// # Errors
    ///
    /// Returns an error if signing or arming the marker fails
    pub async fn issue_approval_token(
        &self,
        user_id: Id,
        fingerprint: &Fingerprint,
    ) -> AppResult<IssuedToken> {
        self.tokens
            .issue(
                ClaimSet::for_subject(&user_id).with_fingerprint(fingerprint.as_str()),
                TokenKind::Approval,
                self.ttl,
            )
            .await
    }

    /// Redeem an approval token and remember its fingerprint
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token is invalid, expired, or already used
    pub async fn approve(&self, approval_token: &str) -> AppResult<(Id, Fingerprint)> {
        let claims = self
            .tokens
            .redeem(approval_token, TokenKind::Approval)
            .await?;
        let user_id = claims.subject_id()?;
        let fingerprint = claims
            .fph
            .map(Fingerprint::from_hash)
            .ok_or_else(|| AppError::invalid_token("approval token carries no fingerprint"))?;

        self.users
            .add_known_fingerprint(user_id, fingerprint.as_str())
            .await?;
        info!(user_id = %user_id, "location approved");
        Ok((user_id, fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_depends_on_both_inputs() {
        let a = Fingerprint::derive("10.0.0.1", "Mozilla/5.0");
        assert_eq!(a, Fingerprint::derive("10.0.0.1", "Mozilla/5.0"));
        assert_ne!(a, Fingerprint::derive("10.0.0.2", "Mozilla/5.0"));
        assert_ne!(a, Fingerprint::derive("10.0.0.1", "curl/8.0"));
        assert_eq!(a.as_str().len(), 64);
    }
}
