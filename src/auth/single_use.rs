// ABOUTME: Tokens that can be redeemed exactly once: email links, password resets, approvals, 2FA challenges
// ABOUTME: A cache marker is armed at issuance and taken atomically on redemption
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::codec::{Claims, ClaimSet, IssuedToken, TokenCodec, TokenError, TokenKind};
use crate::cache::{Cache, CacheKey, CacheProvider};
use crate::errors::{AppError, AppResult};
use chrono::Duration;
use tracing::{debug, warn};

/// Issues and redeems single-use tokens
#[derive(Clone)]
pub struct SingleUseTokens {
    codec: TokenCodec,
    cache: Cache,
}

impl SingleUseTokens {
    /// Create over a codec and the shared cache
    #[must_use]
    pub const fn new(codec: TokenCodec, cache: Cache) -> Self {
        Self { codec, cache }
    }

    /// Sign a token and arm its marker for the token's lifetime
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails or the marker cannot be written
    pub async fn issue(&self, claims: ClaimSet, kind: TokenKind, ttl: Duration) -> AppResult<IssuedToken> {
        let issued = self.codec.issue(claims, kind, ttl)?;
        let marker_ttl = ttl
            .to_std()
            .map_err(|_| AppError::internal("single-use token lifetime must be positive"))?;
        self.cache
            .set(&marker(kind, issued.id()), &true, marker_ttl)
            .await?;
        debug!(kind = %kind, jti = %issued.id(), "single-use token issued");
        Ok(issued)
    }

    /// Verify a token and check its marker without consuming it
    ///
    /// # Errors
    ///
    /// Returns the codec failure, or `InvalidToken` if the token was already used
    pub async fn peek(&self, token: &str, kind: TokenKind) -> Result<Claims, RedeemError> {
        let claims = self.codec.verify_detailed(token, &[kind])?;
        if self.cache.exists(&marker(kind, &claims.jti)).await? {
            Ok(claims)
        } else {
            Err(RedeemError::AlreadyUsed)
        }
    }

    /// Verify a token and consume its marker; only one caller ever succeeds
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token fails verification or was already used
    pub async fn redeem(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let claims = self.codec.verify(token, kind)?;
        self.consume(&claims).await?;
        Ok(claims)
    }

    /// Consume the marker of already-verified claims
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if another caller consumed it first
    pub async fn consume(&self, claims: &Claims) -> AppResult<()> {
        let taken: Option<bool> = self.cache.take(&marker(claims.kind, &claims.jti)).await?;
        if taken.is_none() {
            warn!(kind = %claims.kind, jti = %claims.jti, "single-use token replayed");
            return Err(AppError::invalid_token("token has already been used"));
        }
        Ok(())
    }
}

/// Why a single-use token could not be redeemed
#[derive(Debug)]
pub enum RedeemError {
    /// Failed codec verification
    Token(TokenError),
    /// Marker already consumed or never armed
    AlreadyUsed,
    /// Cache failure
    Infrastructure(AppError),
}

impl From<TokenError> for RedeemError {
    fn from(error: TokenError) -> Self {
        Self::Token(error)
    }
}

impl From<AppError> for RedeemError {
    fn from(error: AppError) -> Self {
        Self::Infrastructure(error)
    }
}

impl From<RedeemError> for AppError {
    fn from(error: RedeemError) -> Self {
        match error {
            RedeemError::Token(token) => token.into(),
            RedeemError::AlreadyUsed => Self::invalid_token("token has already been used"),
            RedeemError::Infrastructure(error) => error,
        }
    }
}

fn marker(kind: TokenKind, token_id: &str) -> CacheKey {
    CacheKey::SingleUse {
        purpose: kind.as_str().to_owned(),
        token_id: token_id.to_owned(),
    }
}
