// ABOUTME: Access/refresh token pairs grouped into session families with mandatory refresh rotation
// ABOUTME: Rotation serializes on the session record via compare-and-swap; reuse revokes the whole family
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Token Service
//!
//! A login creates a session family identified by `sid`. The cache holds one
//! record per family naming the current generation's refresh and access token
//! ids. Refreshing swaps that record for the next generation with a
//! compare-and-swap, so of any number of concurrent refreshes with the same
//! token only one can win.
//!
//! Presenting a refresh token that is no longer the family's current one
//! means it was copied. The family is revoked as a whole: its `sid` is marked
//! and the current generation's token ids are revoked, which kills tokens the
//! legitimate client holds as well.

use super::codec::{Claims, ClaimSet, IssuedToken, TokenCodec, TokenKind};
use super::location::Fingerprint;
use super::revocation::RevocationRegistry;
use crate::cache::{Cache, CacheKey, CacheProvider};
use crate::errors::{AppError, AppResult};
use crate::models::Id;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cached state of one session family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owner
    pub user_id: Id,
    /// Current generation, starting at 0
    pub generation: u64,
    /// Id of the only refresh token that may still be exchanged
    pub refresh_jti: String,
    /// Id of the access token issued alongside it
    pub access_jti: String,
    /// Access token expiry (unix seconds)
    pub access_expires_at: i64,
    /// Refresh token expiry (unix seconds)
    pub refresh_expires_at: i64,
    /// Fingerprint the login came from
    pub fingerprint: Option<String>,
}

/// Access and refresh tokens issued together
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Short-lived access token
    pub access: IssuedToken,
    /// Long-lived refresh token
    pub refresh: IssuedToken,
    /// Family both belong to
    pub session_id: String,
}

impl TokenPair {
    /// Serialized access token
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access.token
    }

    /// Serialized refresh token
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh.token
    }
}

/// Authenticated caller derived from an access or impersonation token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User the request acts as
    pub user_id: Id,
    /// Real user behind an impersonation token
    pub actor_id: Option<Id>,
    /// Kind of token presented
    pub kind: TokenKind,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Presented token id
    pub token_id: String,
    /// Session family, for user access tokens
    pub session_id: Option<String>,
}

impl Principal {
    /// Whether someone else is acting as this user
    #[must_use]
    pub const fn is_impersonated(&self) -> bool {
        self.actor_id.is_some()
    }
}

/// Issues, rotates, and invalidates user token pairs
#[derive(Clone)]
pub struct TokenService {
    codec: TokenCodec,
    revocations: RevocationRegistry,
    cache: Cache,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Create the service
    #[must_use]
    pub const fn new(
        codec: TokenCodec,
        revocations: RevocationRegistry,
        cache: Cache,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            revocations,
            cache,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Start a new session family and issue its first pair
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails or the session cannot be recorded;
    /// no tokens are returned in that case
    pub async fn issue_pair(
        &self,
        user_id: Id,
        fingerprint: Option<&Fingerprint>,
    ) -> AppResult<TokenPair> {
        let session_id = Uuid::new_v4().to_string();
        let fingerprint = fingerprint.map(|fp| fp.as_str().to_owned());
        let pair = self.sign_generation(user_id, &session_id, 0, fingerprint.as_deref())?;
        let record = session_record(user_id, 0, &pair, fingerprint);

        let ttl = self.refresh_ttl_std()?;
        let session_key = CacheKey::Session {
            session_id: session_id.clone(),
        };
        if !self.cache.set_if_absent(&session_key, &record, ttl).await? {
            return Err(AppError::internal("session id collision"));
        }
        if let Err(e) = self
            .cache
            .set_add(&CacheKey::UserSessions { user_id }, &session_id, ttl)
            .await
        {
            // Leave nothing behind that could later be refreshed
            self.cache.invalidate(&session_key).await?;
            return Err(e);
        }

        info!(user_id = %user_id, session_id = %session_id, "session started");
        Ok(pair)
    }

    /// Exchange a refresh token for the next generation's pair
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token fails verification
    /// - `Revoked` if it was revoked, superseded, or lost a concurrent exchange;
    ///   a superseded token also revokes its whole family
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let claims = self.codec.verify(refresh_token, TokenKind::Refresh)?;
        let user_id = claims.subject_id()?;
        let session_id = claims
            .sid
            .clone()
            .ok_or_else(|| AppError::invalid_token("refresh token carries no session"))?;

        if self.revocations.is_family_revoked(&session_id).await? {
            debug!(session_id = %session_id, "refresh on revoked family");
            return Err(AppError::revoked("Token has been revoked"));
        }
        if self.revocations.is_revoked(&claims.jti).await? {
            warn!(user_id = %user_id, session_id = %session_id, "revoked refresh token presented again");
            self.revoke_family(&session_id).await?;
            return Err(AppError::revoked("Token has been revoked"));
        }

        let session_key = CacheKey::Session {
            session_id: session_id.clone(),
        };
        let Some(current) = self.cache.get::<SessionRecord>(&session_key).await? else {
            debug!(session_id = %session_id, "refresh on ended session");
            return Err(AppError::revoked("Session has ended"));
        };
        if current.refresh_jti != claims.jti || current.user_id != user_id {
            warn!(
                user_id = %user_id,
                session_id = %session_id,
                presented_generation = ?claims.gen,
                current_generation = current.generation,
                "superseded refresh token presented"
            );
            self.revoke_family(&session_id).await?;
            return Err(AppError::revoked("Token has been revoked"));
        }

        let generation = current.generation + 1;
        let pair = self.sign_generation(
            user_id,
            &session_id,
            generation,
            current.fingerprint.as_deref(),
        )?;
        let next = session_record(user_id, generation, &pair, current.fingerprint.clone());

        let ttl = self.refresh_ttl_std()?;
        if !self
            .cache
            .compare_and_swap(&session_key, &current, &next, ttl)
            .await?
        {
            warn!(
                user_id = %user_id,
                session_id = %session_id,
                "concurrent refresh with the same token"
            );
            self.revoke_family(&session_id).await?;
            return Err(AppError::revoked("Token has been revoked"));
        }

        self.revocations.revoke_claims(&claims).await?;
        self.revocations
            .revoke(&current.access_jti, remaining(current.access_expires_at))
            .await?;
        self.cache
            .set_add(&CacheKey::UserSessions { user_id }, &session_id, ttl)
            .await?;

        debug!(user_id = %user_id, session_id = %session_id, generation, "session rotated");
        Ok(pair)
    }

    /// Log out the session a refresh token belongs to; idempotent
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token fails verification, or a cache error
    pub async fn invalidate(&self, refresh_token: &str) -> AppResult<()> {
        let claims = self.codec.verify(refresh_token, TokenKind::Refresh)?;
        let user_id = claims.subject_id()?;
        self.revocations.revoke_claims(&claims).await?;
        if let Some(session_id) = &claims.sid {
            self.end_session(user_id, session_id).await?;
        }
        info!(user_id = %user_id, "logged out");
        Ok(())
    }

    /// End every session of a user; returns how many were live
    ///
    /// # Errors
    ///
    /// Returns a cache error if the session index cannot be read
    pub async fn invalidate_all(&self, user_id: Id) -> AppResult<usize> {
        let index = CacheKey::UserSessions { user_id };
        let sessions = self.cache.set_members(&index).await?;
        for session_id in &sessions {
            self.end_session(user_id, session_id).await?;
        }
        self.cache.invalidate(&index).await?;
        info!(user_id = %user_id, count = sessions.len(), "all sessions revoked");
        Ok(sessions.len())
    }

    /// Verify a user access token including revocation
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn verify_access(&self, token: &str) -> AppResult<Claims> {
        self.verify(token, TokenKind::Access).await
    }

    /// Verify a token of a declared kind including revocation
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn verify(&self, token: &str, kind: TokenKind) -> AppResult<Claims> {
        let claims = self.codec.verify(token, kind)?;
        self.ensure_live(&claims).await?;
        Ok(claims)
    }

    /// Resolve the caller behind an access or impersonation token
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn authenticate(&self, token: &str) -> AppResult<Principal> {
        let claims = self
            .codec
            .verify_any(token, &[TokenKind::Access, TokenKind::Impersonation])?;
        self.ensure_live(&claims).await?;
        Ok(Principal {
            user_id: claims.subject_id()?,
            actor_id: claims.actor_id()?,
            kind: claims.kind,
            scopes: claims.scopes,
            token_id: claims.jti,
            session_id: claims.sid,
        })
    }

    async fn ensure_live(&self, claims: &Claims) -> AppResult<()> {
        if self.revocations.is_claims_revoked(claims).await? {
            debug!(jti = %claims.jti, kind = %claims.kind, "revoked token presented");
            return Err(AppError::revoked("Token has been revoked"));
        }
        Ok(())
    }

    fn sign_generation(
        &self,
        user_id: Id,
        session_id: &str,
        generation: u64,
        fingerprint: Option<&str>,
    ) -> AppResult<TokenPair> {
        let mut claims = ClaimSet::for_subject(&user_id).with_session(session_id, generation);
        if let Some(fingerprint) = fingerprint {
            claims = claims.with_fingerprint(fingerprint);
        }
        let access = self
            .codec
            .issue(claims.clone(), TokenKind::Access, self.access_ttl)?;
        let refresh = self
            .codec
            .issue(claims, TokenKind::Refresh, self.refresh_ttl)?;
        Ok(TokenPair {
            access,
            refresh,
            session_id: session_id.to_owned(),
        })
    }

    /// Mark the family revoked and kill its current generation
    async fn revoke_family(&self, session_id: &str) -> AppResult<()> {
        self.revocations
            .revoke_family(session_id, self.refresh_ttl)
            .await?;
        let session_key = CacheKey::Session {
            session_id: session_id.to_owned(),
        };
        if let Some(record) = self.cache.take::<SessionRecord>(&session_key).await? {
            self.revoke_record(&record).await?;
            self.cache
                .set_remove(&CacheKey::UserSessions { user_id: record.user_id }, session_id)
                .await?;
        }
        warn!(session_id = %session_id, "session family revoked");
        Ok(())
    }

    async fn end_session(&self, user_id: Id, session_id: &str) -> AppResult<()> {
        self.revocations
            .revoke_family(session_id, self.refresh_ttl)
            .await?;
        let session_key = CacheKey::Session {
            session_id: session_id.to_owned(),
        };
        if let Some(record) = self.cache.take::<SessionRecord>(&session_key).await? {
            self.revoke_record(&record).await?;
        }
        self.cache
            .set_remove(&CacheKey::UserSessions { user_id }, session_id)
            .await
    }

    async fn revoke_record(&self, record: &SessionRecord) -> AppResult<()> {
        self.revocations
            .revoke(&record.access_jti, remaining(record.access_expires_at))
            .await?;
        self.revocations
            .revoke(&record.refresh_jti, remaining(record.refresh_expires_at))
            .await
    }

    fn refresh_ttl_std(&self) -> AppResult<std::time::Duration> {
        self.refresh_ttl
            .to_std()
            .map_err(|_| AppError::config("refresh token lifetime must be positive"))
    }
}

fn session_record(
    user_id: Id,
    generation: u64,
    pair: &TokenPair,
    fingerprint: Option<String>,
) -> SessionRecord {
    SessionRecord {
        user_id,
        generation,
        refresh_jti: pair.refresh.claims.jti.clone(),
        access_jti: pair.access.claims.jti.clone(),
        access_expires_at: pair.access.claims.exp,
        refresh_expires_at: pair.refresh.claims.exp,
        fingerprint,
    }
}

fn remaining(expires_at: i64) -> Duration {
    DateTime::from_timestamp(expires_at, 0)
        .map_or_else(Duration::zero, |at| (at - Utc::now()).max(Duration::zero()))
}
