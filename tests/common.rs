// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Builds a fully wired in-memory auth context with recording mailer and audit sink
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]
//! Shared test utilities for `gatehouse`

use async_trait::async_trait;
use gatehouse::{
    audit::{AuditEvent, AuditEventType, AuditSink},
    auth::{AuthOrchestrator, ClientInfo, LoginOutcome, TokenPair},
    cache::Cache,
    config::{AuthConfig, LocationPolicy, PasswordHashConfig, RateGuardConfig},
    context::{AuthContext, Collaborators},
    errors::AppResult,
    models::{Id, User, UserRole},
    notifications::{LoginLocation, Mailer, TokenEmail},
    store::{InMemoryUserStore, UserStore},
};
use std::sync::{Arc, Mutex, Once};
use totp_rs::{Algorithm, Secret, TOTP};

static INIT_LOGGER: Once = Once::new();

/// Password every helper-created account uses
pub const PASSWORD: &str = "correct-horse-battery";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Which mail went out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    EmailVerification,
    LoginApproval,
    PasswordReset,
    NewLoginNotice,
}

/// One captured message
#[derive(Debug, Clone)]
pub struct SentMail {
    pub kind: MailKind,
    pub to: String,
    pub token: Option<String>,
}

/// Mailer that keeps every message for inspection
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    fn push(&self, kind: MailKind, to: &str, token: Option<String>) {
        self.sent.lock().unwrap().push(SentMail {
            kind,
            to: to.to_owned(),
            token,
        });
    }

    /// Token of the newest message of a kind sent to `to`
    pub fn last_token(&self, kind: MailKind, to: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|mail| mail.kind == kind && mail.to == to)
            .and_then(|mail| mail.token.clone())
    }

    /// Number of messages of a kind
    pub fn count(&self, kind: MailKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|mail| mail.kind == kind)
            .count()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_email_verification(&self, email: TokenEmail) -> AppResult<()> {
        self.push(MailKind::EmailVerification, &email.to, Some(email.token));
        Ok(())
    }

    async fn send_login_approval(
        &self,
        email: TokenEmail,
        _location: &LoginLocation,
    ) -> AppResult<()> {
        self.push(MailKind::LoginApproval, &email.to, Some(email.token));
        Ok(())
    }

    async fn send_password_reset(&self, email: TokenEmail) -> AppResult<()> {
        self.push(MailKind::PasswordReset, &email.to, Some(email.token));
        Ok(())
    }

    async fn send_new_login_notice(&self, to: &str, _location: &LoginLocation) -> AppResult<()> {
        self.push(MailKind::NewLoginNotice, to, None);
        Ok(())
    }
}

/// Audit sink that keeps every event
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    /// Every event of a type, oldest first
    pub fn events_of(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) -> AppResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Everything a flow test needs
pub struct TestHarness {
    pub orchestrator: AuthOrchestrator,
    pub mailer: Arc<RecordingMailer>,
    pub audit: Arc<RecordingAuditSink>,
    pub users: Arc<InMemoryUserStore>,
}

impl TestHarness {
    /// Wired components
    pub const fn ctx(&self) -> &AuthContext {
        self.orchestrator.context()
    }
}

/// Auth config with the cheapest argon2 cost
pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        password_hash: PasswordHashConfig::minimal(),
        trusted_proxy_depth: 1,
        ..AuthConfig::default()
    }
}

/// Rate guard generous enough not to interfere with flow tests
pub fn relaxed_rate_guard() -> RateGuardConfig {
    RateGuardConfig {
        max_failures: 50,
        ip_ceiling: 10_000,
        ..RateGuardConfig::default()
    }
}

/// Harness with default test settings
pub async fn harness() -> TestHarness {
    harness_with(test_auth_config(), relaxed_rate_guard()).await
}

/// Harness with the given location policy
pub async fn harness_with_policy(policy: LocationPolicy) -> TestHarness {
    let auth = AuthConfig {
        location_policy: policy,
        ..test_auth_config()
    };
    harness_with(auth, relaxed_rate_guard()).await
}

/// Harness with explicit configuration
pub async fn harness_with(auth: AuthConfig, rate_guard: RateGuardConfig) -> TestHarness {
    let cache = Cache::in_memory().await.unwrap();
    harness_with_cache(auth, rate_guard, cache).await
}

/// Harness over a caller-built cache
pub async fn harness_with_cache(
    auth: AuthConfig,
    rate_guard: RateGuardConfig,
    cache: Cache,
) -> TestHarness {
    init_test_logging();
    let users = Arc::new(InMemoryUserStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let audit = Arc::new(RecordingAuditSink::default());

    let ctx = AuthContext::build(
        auth,
        rate_guard,
        cache,
        users.clone(),
        Collaborators {
            mailer: Some(mailer.clone()),
            audit: Some(audit.clone()),
            ..Collaborators::default()
        },
    )
    .unwrap();

    TestHarness {
        orchestrator: AuthOrchestrator::new(ctx),
        mailer,
        audit,
        users,
    }
}

/// The client most tests log in from
pub fn home_client() -> ClientInfo {
    ClientInfo::new("203.0.113.7", "gatehouse-tests/1.0")
}

/// A client the account has never used
pub fn travel_client() -> ClientInfo {
    ClientInfo::new("198.51.100.42", "gatehouse-tests/1.0 (travel)")
}

/// Register through the public flow from the home client
pub async fn register(harness: &TestHarness, email: &str) -> Id {
    harness
        .orchestrator
        .register(email, "Test User", PASSWORD, &home_client())
        .await
        .unwrap()
}

/// Insert a user with a role directly into the store
pub async fn create_user_with_role(harness: &TestHarness, email: &str, role: UserRole) -> Id {
    let hash = harness.ctx().hasher().hash(PASSWORD).await.unwrap();
    let user = User::new(email, "Seeded User", hash).with_role(role);
    harness.users.create_user(&user).await.unwrap();
    user.id
}

/// Log in from the home client and expect tokens
pub async fn login_pair(harness: &TestHarness, email: &str) -> TokenPair {
    match harness
        .orchestrator
        .login(email, PASSWORD, &home_client())
        .await
        .unwrap()
    {
        LoginOutcome::Authenticated(pair) => pair,
        LoginOutcome::TwoFactorRequired { .. } => panic!("unexpected second factor"),
    }
}

/// TOTP code for a base32 secret at `offset_steps` from now
pub fn totp_code(secret_base32: &str, offset_steps: i64) -> String {
    let secret = Secret::Encoded(secret_base32.to_owned()).to_bytes().unwrap();
    let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, secret, None, "test".to_owned());
    let now = chrono::Utc::now().timestamp() + offset_steps * 30;
    totp.generate(u64::try_from(now).unwrap())
}

/// Enroll and enable two-factor for a user; returns the secret and backup codes
pub async fn enable_two_factor(harness: &TestHarness, user_id: Id) -> (String, Vec<String>) {
    let two_factor = harness.ctx().two_factor();
    let enrollment = two_factor.enroll(user_id).await.unwrap();
    let codes = two_factor
        .enable(user_id, &totp_code(&enrollment.secret, 0))
        .await
        .unwrap();
    (enrollment.secret, codes)
}

/// A six-digit code that matches no step inside the drift window
pub fn wrong_totp_code(secret_base32: &str) -> String {
    let live: Vec<String> = (-2..=2).map(|offset| totp_code(secret_base32, offset)).collect();
    (0..1_000_000)
        .map(|n| format!("{n:06}"))
        .find(|candidate| !live.contains(candidate))
        .unwrap()
}
