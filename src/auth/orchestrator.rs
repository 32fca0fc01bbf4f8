// ABOUTME: Public auth flows composed from the individual components, each gated by the rate guard
// ABOUTME: Login walks password, optional second factor, and location approval before tokens are issued
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Auth Orchestrator
//!
//! Every flow runs inside [`AuthOrchestrator::guarded`]: the rate guard is
//! checked before any work happens, and the outcome is recorded afterwards.
//! Auth failures count against the key; infrastructure errors do not reset
//! it. A login that stops at location approval counts as a success, since
//! the password was right.

use super::codec::{Claims, ClaimSet, IssuedToken, TokenKind};
use super::impersonation::ImpersonationGrant;
use super::location::{Fingerprint, FingerprintStatus};
use super::password::validate_password;
use super::rate_guard::{RateAction, RateKey, RateOutcome};
use super::tokens::{Principal, TokenPair};
use crate::audit::{AuditEvent, AuditEventType};
use crate::config::LocationPolicy;
use crate::context::AuthContext;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::user::{normalize_email, validate_email, validate_name};
use crate::models::{Id, User};
use crate::notifications::{LoginLocation, TokenEmail};
use std::future::Future;
use tracing::{debug, info};

/// Where a request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client IP as seen by the server
    pub ip: String,
    /// `User-Agent` header, empty when absent
    pub user_agent: String,
}

impl ClientInfo {
    /// Describe a client
    #[must_use]
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Device/location fingerprint
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::derive(&self.ip, &self.user_agent)
    }

    /// Location details for emails
    #[must_use]
    pub fn location(&self) -> LoginLocation {
        LoginLocation {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    fn rate_key(&self) -> RateKey {
        RateKey::ip(&self.ip)
    }

    fn rate_key_for(&self, subject: &str) -> RateKey {
        RateKey::subject(subject, &self.ip)
    }
}

/// Result of a password login
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Password accepted; a code is still needed
    TwoFactorRequired {
        /// Pending challenge to present with the code
        pending: IssuedToken,
    },
    /// Fully authenticated
    Authenticated(TokenPair),
}

/// Entry point for every auth flow
#[derive(Clone)]
pub struct AuthOrchestrator {
    ctx: AuthContext,
}

impl AuthOrchestrator {
    /// Create over a wired context
    #[must_use]
    pub const fn new(ctx: AuthContext) -> Self {
        Self { ctx }
    }

    /// Underlying components
    #[must_use]
    pub const fn context(&self) -> &AuthContext {
        &self.ctx
    }

    /// Create an account and email its verification link
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the email, name, or password is rejected
    /// - `ResourceAlreadyExists` if the email is taken
    /// - `RateLimited` if the client is throttled
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
        client: &ClientInfo,
    ) -> AppResult<Id> {
        self.guarded(&client.rate_key(), RateAction::Register, async {
            validate_email(email)?;
            validate_name(name)?;
            validate_password(password)?;

            let hash = self.ctx.hasher().hash(password).await?;
            let user = User::new(email, name, hash);
            self.ctx.users().create_user(&user).await?;
            self.ctx
                .users()
                .add_known_fingerprint(user.id, client.fingerprint().as_str())
                .await?;

            let token = self
                .ctx
                .single_use()
                .issue(
                    ClaimSet::for_subject(&user.id),
                    TokenKind::EmailVerify,
                    self.ctx.config().ttl.email_verify(),
                )
                .await?;
            self.ctx
                .mailer()
                .send_email_verification(TokenEmail {
                    to: user.email.clone(),
                    expires_at: token.expires_at(),
                    token: token.token,
                })
                .await?;

            info!(user_id = %user.id, "user registered");
            Ok(user.id)
        })
        .await
    }

    /// Redeem an email verification link
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the link is invalid, expired, or already used
    pub async fn verify_email(&self, token: &str, client: &ClientInfo) -> AppResult<Id> {
        self.guarded(&client.rate_key(), RateAction::VerifyEmail, async {
            let claims = self
                .ctx
                .single_use()
                .redeem(token, TokenKind::EmailVerify)
                .await?;
            let user_id = claims.subject_id()?;
            self.ctx.users().mark_email_verified(user_id).await?;
            info!(user_id = %user_id, "email verified");
            Ok(user_id)
        })
        .await
    }

    /// Password login
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` for an unknown account or wrong password
    /// - `ApprovalPending` if the location must be approved first
    /// - `RateLimited` if the account or client is throttled
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: &ClientInfo,
    ) -> AppResult<LoginOutcome> {
        let key = client.rate_key_for(&normalize_email(identifier));
        self.guarded(&key, RateAction::Login, async {
            let verified = self.ctx.credentials().verify(identifier, password).await?;
            if verified.requires_two_factor {
                let pending = self
                    .ctx
                    .two_factor()
                    .issue_challenge(verified.user_id)
                    .await?;
                debug!(user_id = %verified.user_id, "second factor required");
                return Ok(LoginOutcome::TwoFactorRequired { pending });
            }
            self.finish_login(verified.user_id, client)
                .await
                .map(LoginOutcome::Authenticated)
        })
        .await
    }

    /// Answer a pending challenge with a TOTP or backup code
    ///
    /// # Errors
    ///
    /// - `ChallengeExpired` if the challenge timed out
    /// - `InvalidCode` for a wrong, reused, or replayed code
    /// - `ApprovalPending` if the location must be approved first
    pub async fn complete_two_factor(
        &self,
        pending_token: &str,
        code: &str,
        client: &ClientInfo,
    ) -> AppResult<TokenPair> {
        let key = self
            .ctx
            .codec()
            .verify_detailed(pending_token, &[TokenKind::TwoFactorPending])
            .map_or_else(|_| client.rate_key(), |claims| client.rate_key_for(&claims.sub));
        self.guarded(&key, RateAction::TwoFactor, async {
            let user_id = self.ctx.two_factor().verify_code(pending_token, code).await?;
            self.finish_login(user_id, client).await
        })
        .await
    }

    /// Rotate a refresh token
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> AppResult<TokenPair> {
        self.guarded(&client.rate_key(), RateAction::Refresh, async {
            self.ctx.tokens().refresh(refresh_token).await
        })
        .await
    }

    /// End the session a refresh token belongs to
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn logout(&self, refresh_token: &str, client: &ClientInfo) -> AppResult<()> {
        self.guarded(&client.rate_key(), RateAction::Logout, async {
            self.ctx.tokens().invalidate(refresh_token).await
        })
        .await
    }

    /// Redeem an emailed location approval
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the link is invalid, expired, or already used
    pub async fn approve_location(&self, approval_token: &str, client: &ClientInfo) -> AppResult<Id> {
        self.guarded(&client.rate_key(), RateAction::ApproveLocation, async {
            let (user_id, _) = self.ctx.approvals().approve(approval_token).await?;
            Ok(user_id)
        })
        .await
    }

    /// Email a reset link if the account exists
    ///
    /// Succeeds whether or not the account exists.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited`, or an infrastructure error
    pub async fn request_password_reset(&self, email: &str, client: &ClientInfo) -> AppResult<()> {
        let email = normalize_email(email);
        self.guarded(&client.rate_key_for(&email), RateAction::PasswordReset, async {
            let Some(user) = self.ctx.users().get_user_by_email(&email).await? else {
                debug!("password reset requested for unknown identifier");
                return Ok(());
            };
            let token = self
                .ctx
                .single_use()
                .issue(
                    ClaimSet::for_subject(&user.id),
                    TokenKind::PasswordReset,
                    self.ctx.config().ttl.password_reset(),
                )
                .await?;
            self.ctx
                .mailer()
                .send_password_reset(TokenEmail {
                    to: user.email,
                    expires_at: token.expires_at(),
                    token: token.token,
                })
                .await?;
            info!(user_id = %user.id, "password reset link issued");
            Ok(())
        })
        .await
    }

    /// Set a new password through a reset link and end every session
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the new password is rejected
    /// - `InvalidToken` if the link is invalid, expired, or already used
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> AppResult<()> {
        self.guarded(&client.rate_key(), RateAction::PasswordReset, async {
            validate_password(new_password)?;
            let claims = self
                .ctx
                .single_use()
                .redeem(token, TokenKind::PasswordReset)
                .await?;
            let user_id = claims.subject_id()?;

            let hash = self.ctx.hasher().hash(new_password).await?;
            self.ctx.users().update_password_hash(user_id, &hash).await?;
            let revoked = self.ctx.tokens().invalidate_all(user_id).await?;

            self.ctx
                .audit()
                .record(
                    AuditEvent::new(
                        AuditEventType::PasswordReset,
                        "success",
                        format!("password reset, {revoked} sessions revoked"),
                    )
                    .with_subject(user_id)
                    .with_token(&claims.jti),
                )
                .await?;
            info!(user_id = %user_id, sessions = revoked, "password reset");
            Ok(())
        })
        .await
    }

    /// Let an authenticated elevated user act as another user
    ///
    /// # Errors
    ///
    /// - `InsufficientPermission` if the caller is impersonating, not elevated,
    ///   or targets a user that cannot be impersonated
    /// - `ResourceNotFound` if the target does not exist
    pub async fn impersonate(
        &self,
        principal: &Principal,
        target_id: Id,
        client: &ClientInfo,
    ) -> AppResult<ImpersonationGrant> {
        let key = client.rate_key_for(&principal.user_id.to_external());
        self.guarded(&key, RateAction::Impersonate, async {
            if principal.is_impersonated() {
                return Err(AppError::insufficient_permission(
                    "impersonation tokens cannot start another impersonation",
                ));
            }
            self.ctx
                .impersonation()
                .issue(principal.user_id, target_id)
                .await
        })
        .await
    }

    /// Give up an impersonation grant before it expires
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked` if the token is not a live grant
    pub async fn end_impersonation(&self, token: &str, client: &ClientInfo) -> AppResult<()> {
        self.guarded(&client.rate_key(), RateAction::Logout, async {
            self.ctx.impersonation().end(token).await?;
            info!("impersonation ended");
            Ok(())
        })
        .await
    }

    /// Verify any token of a declared kind, including revocation
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn verify_token(
        &self,
        token: &str,
        kind: TokenKind,
        client: &ClientInfo,
    ) -> AppResult<Claims> {
        self.guarded(&client.rate_key(), RateAction::VerifyToken, async {
            self.ctx.tokens().verify(token, kind).await
        })
        .await
    }

    /// Resolve the caller of an authenticated request
    ///
    /// Requests served under an impersonation token are audited with `action`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` or `Revoked`
    pub async fn authenticate(&self, token: &str, action: &str) -> AppResult<Principal> {
        let principal = self.ctx.tokens().authenticate(token).await?;
        if principal.is_impersonated() {
            self.ctx
                .impersonation()
                .record_use(&principal, action)
                .await?;
        }
        Ok(principal)
    }

    /// Apply the location policy and issue tokens when allowed
    async fn finish_login(&self, user_id: Id, client: &ClientInfo) -> AppResult<TokenPair> {
        let fingerprint = client.fingerprint();
        let status = self
            .ctx
            .approvals()
            .check_fingerprint(user_id, &fingerprint)
            .await?;
        if status == FingerprintStatus::Known {
            return self.ctx.tokens().issue_pair(user_id, Some(&fingerprint)).await;
        }

        let user = self
            .ctx
            .users()
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;
        let location = client.location();

        match self.ctx.config().location_policy {
            LocationPolicy::Require => {
                let approval = self
                    .ctx
                    .approvals()
                    .issue_approval_token(user_id, &fingerprint)
                    .await?;
                self.ctx
                    .mailer()
                    .send_login_approval(
                        TokenEmail {
                            to: user.email,
                            expires_at: approval.expires_at(),
                            token: approval.token,
                        },
                        &location,
                    )
                    .await?;
                info!(user_id = %user_id, "tokens withheld pending location approval");
                Err(AppError::approval_pending())
            }
            LocationPolicy::NotifyOnly => {
                let pair = self.ctx.tokens().issue_pair(user_id, Some(&fingerprint)).await?;
                self.ctx
                    .users()
                    .add_known_fingerprint(user_id, fingerprint.as_str())
                    .await?;
                self.ctx
                    .mailer()
                    .send_new_login_notice(&user.email, &location)
                    .await?;
                info!(user_id = %user_id, "new location accepted with notice");
                Ok(pair)
            }
        }
    }

    /// Run `attempt` behind the rate guard and record how it ended
    async fn guarded<T, F>(&self, key: &RateKey, action: RateAction, attempt: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        self.ctx.rate_guard().check(key, action).await?;
        let result = attempt.await;
        let outcome = match &result {
            Ok(_) => Some(RateOutcome::Success),
            Err(e) if e.code == ErrorCode::ApprovalPending => Some(RateOutcome::Success),
            Err(e) if e.code.is_auth_failure() => Some(RateOutcome::Failure),
            Err(_) => None,
        };
        if let Some(outcome) = outcome {
            self.ctx.rate_guard().record(key, action, outcome).await?;
        }
        result
    }
}
