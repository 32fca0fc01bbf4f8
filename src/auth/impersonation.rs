// ABOUTME: Short-lived impersonation tokens letting an elevated user act as another user
// ABOUTME: Every grant, refusal, and use is written to the audit sink; grants are never renewable
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::codec::{ClaimSet, IssuedToken, TokenCodec, TokenKind};
use super::revocation::RevocationRegistry;
use super::tokens::{Principal, TokenService};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::errors::{AppError, AppResult};
use crate::models::Id;
use crate::permissions::RoleAuthority;
use crate::store::UserStore;
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};

/// Issued impersonation token and the parties it binds
#[derive(Debug, Clone)]
pub struct ImpersonationGrant {
    /// Signed token; subject is the target, `act` is the actor
    pub token: IssuedToken,
    /// Elevated user
    pub actor_id: Id,
    /// User being acted as
    pub target_id: Id,
}

/// Grants and audits impersonation
#[derive(Clone)]
pub struct ImpersonationService {
    codec: TokenCodec,
    revocations: RevocationRegistry,
    tokens: TokenService,
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleAuthority>,
    audit: Arc<dyn AuditSink>,
    ttl: Duration,
}

impl ImpersonationService {
    /// Create the service
    #[must_use]
    pub fn new(
        codec: TokenCodec,
        revocations: RevocationRegistry,
        tokens: TokenService,
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleAuthority>,
        audit: Arc<dyn AuditSink>,
        ttl: Duration,
    ) -> Self {
        Self {
            codec,
            revocations,
            tokens,
            users,
            roles,
            audit,
            ttl,
        }
    }

    /// Let `actor_id` act as `target_id` for a short time
    ///
    /// # Errors
    ///
    /// - `InsufficientPermission` if the actor is not elevated, targets itself,
    ///   or targets another elevated user
    /// - `ResourceNotFound` if the target does not exist
    pub async fn issue(&self, actor_id: Id, target_id: Id) -> AppResult<ImpersonationGrant> {
        if actor_id == target_id {
            return Err(self
                .deny(actor_id, target_id, "cannot impersonate yourself")
                .await);
        }
        if !self.roles.is_elevated(actor_id).await? {
            return Err(self
                .deny(actor_id, target_id, "impersonation requires an elevated role")
                .await);
        }

        let target = self
            .users
            .get_user(target_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;
        if target.role.is_elevated() {
            return Err(self
                .deny(actor_id, target_id, "elevated users cannot be impersonated")
                .await);
        }

        let token = self.codec.issue(
            ClaimSet::for_subject(&target_id).with_actor(&actor_id),
            TokenKind::Impersonation,
            self.ttl,
        )?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::ImpersonationGranted,
                    "success",
                    format!("impersonation granted until {}", token.expires_at()),
                )
                .with_actor(actor_id)
                .with_subject(target_id)
                .with_token(token.id()),
            )
            .await?;
        info!(actor_id = %actor_id, target_id = %target_id, "impersonation granted");

        Ok(ImpersonationGrant {
            token,
            actor_id,
            target_id,
        })
    }

    /// Audit a request served under an impersonation principal
    ///
    /// # Errors
    ///
    /// Returns an error if the audit sink fails
    pub async fn record_use(&self, principal: &Principal, action: &str) -> AppResult<()> {
        let Some(actor_id) = principal.actor_id else {
            return Ok(());
        };
        self.audit
            .record(
                AuditEvent::new(AuditEventType::ImpersonationUsed, "success", action)
                    .with_actor(actor_id)
                    .with_subject(principal.user_id)
                    .with_token(&principal.token_id),
            )
            .await
    }

    /// End an impersonation grant before it expires
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked` if the token is not a live grant
    pub async fn end(&self, impersonation_token: &str) -> AppResult<()> {
        let claims = self
            .tokens
            .verify(impersonation_token, TokenKind::Impersonation)
            .await?;
        self.revocations.revoke_claims(&claims).await?;

        let mut event = AuditEvent::new(
            AuditEventType::ImpersonationEnded,
            "success",
            "impersonation ended early",
        )
        .with_subject(claims.subject_id()?)
        .with_token(&claims.jti);
        if let Some(actor_id) = claims.actor_id()? {
            event = event.with_actor(actor_id);
        }
        self.audit.record(event).await
    }

    async fn deny(&self, actor_id: Id, target_id: Id, reason: &str) -> AppError {
        warn!(actor_id = %actor_id, target_id = %target_id, reason, "impersonation denied");
        let event = AuditEvent::new(AuditEventType::ImpersonationDenied, "denied", reason)
            .with_actor(actor_id)
            .with_subject(target_id);
        if let Err(e) = self.audit.record(event).await {
            return e;
        }
        AppError::insufficient_permission(reason)
    }
}
