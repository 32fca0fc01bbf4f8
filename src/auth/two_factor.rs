// ABOUTME: Second factor: pending challenges, TOTP codes with drift and replay guard, and one-time backup codes
// ABOUTME: Also owns enrollment, enabling, disabling, and backup code regeneration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Two-Factor Challenge
//!
//! A login for an account with two-factor enabled stops after the password
//! check and receives a short-lived pending token. The pending token plus a
//! code completes the login. A code is either the current TOTP value (one step
//! of drift either way) or one of the user's backup codes.
//!
//! Checking a code never consumes anything. Only once a code matches is the
//! challenge marker taken and the code's one-time use committed: a TOTP step is
//! recorded in the cache so it cannot be replayed, and a backup code is removed
//! with the store's conditional delete.

use super::codec::{ClaimSet, IssuedToken, TokenError, TokenKind};
use super::password::PasswordHasher;
use super::single_use::{RedeemError, SingleUseTokens};
use crate::cache::{Cache, CacheKey, CacheProvider};
use crate::constants::credentials::{
    BACKUP_CODE_ALPHABET, BACKUP_CODE_COUNT, BACKUP_CODE_GROUP_SIZE, BACKUP_CODE_LEN,
};
use crate::constants::totp::{DIGITS, SKEW_STEPS, STEP_SECS};
use crate::errors::{AppError, AppResult};
use crate::models::{Id, User};
use crate::store::UserStore;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};

/// Secret material handed to the user when enrollment starts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorEnrollment {
    /// Base32 secret for manual entry
    pub secret: String,
    /// `otpauth://` URL for QR rendering
    pub otpauth_url: String,
}

enum MatchedCode {
    Totp { step: u64 },
    Backup { hash: String },
}

/// Issues pending challenges and checks second-factor codes
#[derive(Clone)]
pub struct TwoFactorChallenge {
    tokens: SingleUseTokens,
    cache: Cache,
    users: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    ttl: Duration,
    issuer: String,
}

impl TwoFactorChallenge {
    /// Create the challenge service
    #[must_use]
    pub fn new(
        tokens: SingleUseTokens,
        cache: Cache,
        users: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        ttl: Duration,
        issuer: &str,
    ) -> Self {
        Self {
            tokens,
            cache,
            users,
            hasher,
            ttl,
            issuer: issuer.to_owned(),
        }
    }

    /// Issue a pending token bound to `user_id`
    ///
    /// # Errors
    ///
    /// Returns an error if signing or arming the marker fails
    pub async fn issue_challenge(&self, user_id: Id) -> AppResult<IssuedToken> {
        self.tokens
            .issue(
                ClaimSet::for_subject(&user_id),
                TokenKind::TwoFactorPending,
                self.ttl,
            )
            .await
    }

    /// Complete a challenge with a TOTP or backup code
    ///
    /// # Errors
    ///
    /// - `ChallengeExpired` if the pending token is past its lifetime
    /// - `InvalidToken` if it is forged, of another kind, or already completed
    /// - `InvalidCode` if the code matches nothing
    pub async fn verify_code(&self, pending_token: &str, code: &str) -> AppResult<Id> {
        let claims = match self
            .tokens
            .peek(pending_token, TokenKind::TwoFactorPending)
            .await
        {
            Ok(claims) => claims,
            Err(RedeemError::Token(TokenError::Expired(_))) => {
                return Err(AppError::challenge_expired())
            }
            Err(other) => return Err(other.into()),
        };

        let user_id = claims.subject_id()?;
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::invalid_token("challenge subject no longer exists"))?;

        let Some(matched) = self.match_code(&user, code).await? else {
            warn!(user_id = %user_id, "second-factor code rejected");
            return Err(AppError::invalid_code());
        };

        self.tokens.consume(&claims).await?;
        if !self.commit(user_id, matched).await? {
            warn!(user_id = %user_id, "second-factor code was used concurrently");
            return Err(AppError::invalid_code());
        }

        info!(user_id = %user_id, "second factor verified");
        Ok(user_id)
    }

    /// Start enrollment: generate and store a secret without enabling it
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown user, or `ResourceAlreadyExists`
    /// if two-factor is already enabled
    pub async fn enroll(&self, user_id: Id) -> AppResult<TwoFactorEnrollment> {
        let user = self.user(user_id).await?;
        if user.two_factor_enabled {
            return Err(AppError::already_exists(
                "Two-factor authentication is already enabled",
            ));
        }

        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| AppError::internal(format!("TOTP secret generation failed: {e}")))?;
        let totp = self.totp(secret_bytes, &user.email)?;
        let secret = totp.get_secret_base32();
        self.users
            .set_two_factor_secret(user_id, Some(&secret))
            .await?;

        info!(user_id = %user_id, "two-factor enrollment started");
        Ok(TwoFactorEnrollment {
            secret,
            otpauth_url: totp.get_url(),
        })
    }

    /// Confirm enrollment with a current code; returns a fresh backup code set
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if enrollment never started, or `InvalidCode`
    pub async fn enable(&self, user_id: Id, code: &str) -> AppResult<Vec<String>> {
        let user = self.user(user_id).await?;
        if user.two_factor_enabled {
            return Err(AppError::already_exists(
                "Two-factor authentication is already enabled",
            ));
        }
        if user.two_factor_secret.is_none() {
            return Err(AppError::invalid_input(
                "Two-factor enrollment has not been started",
            ));
        }

        let Some(step) = self.match_totp(&user, code)? else {
            return Err(AppError::invalid_code());
        };
        if !self.commit(user_id, MatchedCode::Totp { step }).await? {
            return Err(AppError::invalid_code());
        }

        self.users.set_two_factor_enabled(user_id, true).await?;
        let codes = self.regenerate_backup_codes(user_id).await?;
        info!(user_id = %user_id, "two-factor enabled");
        Ok(codes)
    }

    /// Turn the second factor off; requires a TOTP or backup code
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if two-factor is not enabled, or `InvalidCode`
    pub async fn disable(&self, user_id: Id, code: &str) -> AppResult<()> {
        let user = self.user(user_id).await?;
        if !user.two_factor_enabled {
            return Err(AppError::invalid_input(
                "Two-factor authentication is not enabled",
            ));
        }

        let Some(matched) = self.match_code(&user, code).await? else {
            return Err(AppError::invalid_code());
        };
        if !self.commit(user_id, matched).await? {
            return Err(AppError::invalid_code());
        }

        self.users.set_two_factor_enabled(user_id, false).await?;
        self.users.set_two_factor_secret(user_id, None).await?;
        self.users.replace_backup_codes(user_id, &[]).await?;
        info!(user_id = %user_id, "two-factor disabled");
        Ok(())
    }

    /// Replace every backup code at once; returns the new codes in display form
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown user, or a hashing error
    pub async fn regenerate_backup_codes(&self, user_id: Id) -> AppResult<Vec<String>> {
        let codes = generate_backup_codes();
        let mut hashes = Vec::with_capacity(codes.len());
        for code in &codes {
            let normalized = normalize_backup_code(code)
                .ok_or_else(|| AppError::internal("generated backup code failed normalization"))?;
            hashes.push(self.hasher.hash(&normalized).await?);
        }
        self.users.replace_backup_codes(user_id, &hashes).await?;
        info!(user_id = %user_id, count = codes.len(), "backup codes regenerated");
        Ok(codes)
    }

    async fn user(&self, user_id: Id) -> AppResult<User> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))
    }

    fn totp(&self, secret: Vec<u8>, account: &str) -> AppResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECS,
            secret,
            Some(self.issuer.clone()),
            account.to_owned(),
        )
        .map_err(|e| AppError::internal(format!("TOTP init error: {e}")))
    }

    /// Find which code the input matches, without consuming it
    async fn match_code(&self, user: &User, code: &str) -> AppResult<Option<MatchedCode>> {
        if let Some(step) = self.match_totp(user, code)? {
            return Ok(Some(MatchedCode::Totp { step }));
        }
        let Some(normalized) = normalize_backup_code(code) else {
            return Ok(None);
        };
        for hash in &user.backup_code_hashes {
            if self.hasher.verify(&normalized, hash).await? {
                return Ok(Some(MatchedCode::Backup { hash: hash.clone() }));
            }
        }
        Ok(None)
    }

    fn match_totp(&self, user: &User, code: &str) -> AppResult<Option<u64>> {
        let Some(secret) = user.two_factor_secret.as_deref() else {
            return Ok(None);
        };
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        let secret_bytes = Secret::Encoded(secret.to_owned())
            .to_bytes()
            .map_err(|e| AppError::internal(format!("stored TOTP secret is invalid: {e}")))?;
        let totp = self.totp(secret_bytes, &user.email)?;
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        Ok(matching_step(&totp, code, now))
    }

    /// Record the one-time use; false if someone else used it first
    async fn commit(&self, user_id: Id, matched: MatchedCode) -> AppResult<bool> {
        match matched {
            MatchedCode::Totp { step } => {
                // Long enough to outlive every window the step is accepted in
                let guard_ttl =
                    std::time::Duration::from_secs(STEP_SECS * (2 * u64::from(SKEW_STEPS) + 2));
                self.cache
                    .set_if_absent(&CacheKey::TotpStepUsed { user_id, step }, &true, guard_ttl)
                    .await
            }
            MatchedCode::Backup { hash } => {
                let consumed = self.users.consume_backup_code(user_id, &hash).await?;
                if consumed {
                    info!(user_id = %user_id, "backup code consumed");
                }
                Ok(consumed)
            }
        }
    }
}

/// RFC 6238 step whose code equals `code`, within the configured drift of `now`
fn matching_step(totp: &TOTP, code: &str, now: u64) -> Option<u64> {
    let current = now / STEP_SECS;
    let skew = u64::from(SKEW_STEPS);
    let mut matched = None;
    for step in current.saturating_sub(skew)..=current + skew {
        let candidate = totp.generate(step * STEP_SECS);
        if bool::from(candidate.as_bytes().ct_eq(code.as_bytes())) {
            matched = Some(step);
        }
    }
    matched
}

/// Generate a backup code set in grouped display form
#[must_use]
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut raw = [0_u8; BACKUP_CODE_LEN];
            rng.fill_bytes(&mut raw);
            let normalized: String = raw
                .iter()
                .map(|byte| {
                    let idx = usize::from(*byte) % BACKUP_CODE_ALPHABET.len();
                    char::from(BACKUP_CODE_ALPHABET[idx])
                })
                .collect();
            format_backup_code(&normalized)
        })
        .collect()
}

/// Strip separators and uppercase; `None` if the result cannot be a backup code
#[must_use]
pub fn normalize_backup_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    let valid = normalized.len() == BACKUP_CODE_LEN
        && normalized
            .bytes()
            .all(|byte| BACKUP_CODE_ALPHABET.contains(&byte));
    valid.then_some(normalized)
}

/// Insert dashes between groups, e.g. `ABCD-EFGH-JKLM`
#[must_use]
pub fn format_backup_code(normalized: &str) -> String {
    let mut out = String::with_capacity(normalized.len() + normalized.len() / BACKUP_CODE_GROUP_SIZE);
    for (idx, ch) in normalized.chars().enumerate() {
        if idx > 0 && idx % BACKUP_CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        out.push(ch);
    }
    out
}
