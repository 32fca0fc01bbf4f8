// ABOUTME: Audit trail for security-sensitive auth events such as impersonation and mass session revocation
// ABOUTME: Events go to an AuditSink; the default sink writes structured tracing events to the audit target
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::AppResult;
use crate::logging::AUDIT_TARGET;
use crate::models::Id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Impersonation token issued
    ImpersonationGranted,
    /// Impersonation request refused
    ImpersonationDenied,
    /// Request served under an impersonation token
    ImpersonationUsed,
    /// Impersonation token ended early
    ImpersonationEnded,
    /// Password replaced through a reset link
    PasswordReset,
}

/// Security audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Type of audit event
    pub event_type: AuditEventType,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// User who performed the action
    pub actor_id: Option<Id>,
    /// User the action was performed on
    pub subject_id: Option<Id>,
    /// Token involved, by id
    pub token_id: Option<String>,
    /// `success`, `denied`, ...
    pub result: String,
    /// Free-form detail
    pub description: String,
}

impl AuditEvent {
    /// Create an event with no parties attached
    #[must_use]
    pub fn new(event_type: AuditEventType, result: &str, description: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            actor_id: None,
            subject_id: None,
            token_id: None,
            result: result.to_owned(),
            description: description.into(),
        }
    }

    /// Set the acting user
    #[must_use]
    pub const fn with_actor(mut self, actor_id: Id) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Set the affected user
    #[must_use]
    pub const fn with_subject(mut self, subject_id: Id) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    /// Set the token involved
    #[must_use]
    pub fn with_token(mut self, token_id: &str) -> Self {
        self.token_id = Some(token_id.to_owned());
        self
    }
}

/// Receives audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be persisted
    async fn record(&self, event: AuditEvent) -> AppResult<()>;
}

/// Writes audit events to the `gatehouse::audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> AppResult<()> {
        tracing::info!(
            target: AUDIT_TARGET,
            event_id = %event.event_id,
            event_type = ?event.event_type,
            actor_id = ?event.actor_id.map(|id| id.to_external()),
            subject_id = ?event.subject_id.map(|id| id.to_external()),
            token_id = ?event.token_id,
            result = %event.result,
            "{}",
            event.description
        );
        Ok(())
    }
}
