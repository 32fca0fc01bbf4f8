// ABOUTME: Outbound email collaborator for verification links, location approvals, and password resets
// ABOUTME: Delivery is external; the default mailer only records that a message was queued
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

/// A link-bearing message for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEmail {
    /// Recipient address
    pub to: String,
    /// Token to embed in the link
    pub token: String,
    /// When the link stops working
    pub expires_at: DateTime<Utc>,
}

/// Where a login came from, for approval and notice emails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginLocation {
    /// Client IP
    pub ip: String,
    /// Client user agent
    pub user_agent: String,
}

/// Sends auth emails
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Email verification link after registration
    async fn send_email_verification(&self, email: TokenEmail) -> AppResult<()>;

    /// Approval link for a login from an unrecognized location
    async fn send_login_approval(&self, email: TokenEmail, location: &LoginLocation) -> AppResult<()>;

    /// Password reset link
    async fn send_password_reset(&self, email: TokenEmail) -> AppResult<()>;

    /// Notice that a new location signed in, when approval is not required
    async fn send_new_login_notice(&self, to: &str, location: &LoginLocation) -> AppResult<()>;
}

/// Logs each message instead of delivering it
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send_email_verification(&self, email: TokenEmail) -> AppResult<()> {
        info!(to = %email.to, expires_at = %email.expires_at, "email verification queued");
        Ok(())
    }

    async fn send_login_approval(&self, email: TokenEmail, location: &LoginLocation) -> AppResult<()> {
        info!(
            to = %email.to,
            ip = %location.ip,
            expires_at = %email.expires_at,
            "login approval queued"
        );
        Ok(())
    }

    async fn send_password_reset(&self, email: TokenEmail) -> AppResult<()> {
        info!(to = %email.to, expires_at = %email.expires_at, "password reset queued");
        Ok(())
    }

    async fn send_new_login_notice(&self, to: &str, location: &LoginLocation) -> AppResult<()> {
        info!(to = %to, ip = %location.ip, "new login notice queued");
        Ok(())
    }
}
