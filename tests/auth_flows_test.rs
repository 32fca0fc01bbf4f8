// ABOUTME: End-to-end tests for the orchestrated auth flows
// ABOUTME: Covers registration, login with and without second factor, location approval, and password reset
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{
    create_user_with_role, enable_two_factor, harness, harness_with_policy, home_client,
    login_pair, register, totp_code, travel_client, wrong_totp_code, MailKind, PASSWORD,
};
use gatehouse::{
    audit::AuditEventType,
    auth::{LoginOutcome, TokenKind},
    config::LocationPolicy,
    errors::ErrorCode,
    models::UserRole,
    store::UserStore,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_register_then_login_from_known_location() {
    let h = harness().await;
    let user_id = register(&h, "alice@example.com").await;

    let pair = login_pair(&h, "alice@example.com").await;
    let claims = h
        .ctx()
        .tokens()
        .verify_access(pair.access_token())
        .await
        .unwrap();
    assert_eq!(claims.subject_id().unwrap(), user_id);
    assert_eq!(claims.kind, TokenKind::Access);
}

#[tokio::test]
async fn test_register_rejects_bad_input_and_duplicates() {
    let h = harness().await;
    let client = home_client();

    let err = h
        .orchestrator
        .register("not-an-email", "Test User", PASSWORD, &client)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = h
        .orchestrator
        .register("bob@example.com", "B0", PASSWORD, &client)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = h
        .orchestrator
        .register("bob@example.com", "Bob Builder", "short", &client)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    register(&h, "bob@example.com").await;
    let err = h
        .orchestrator
        .register("BOB@example.com", "Bob Builder", PASSWORD, &client)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceAlreadyExists);
}

#[tokio::test]
async fn test_email_verification_link_works_once() {
    let h = harness().await;
    let user_id = register(&h, "carol@example.com").await;
    let token = h
        .mailer
        .last_token(MailKind::EmailVerification, "carol@example.com")
        .expect("verification mail sent");

    let verified = h
        .orchestrator
        .verify_email(&token, &home_client())
        .await
        .unwrap();
    assert_eq!(verified, user_id);
    assert!(h.users.get_user(user_id).await.unwrap().unwrap().email_verified);

    let err = h
        .orchestrator
        .verify_email(&token, &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidToken);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_account_look_the_same() {
    let h = harness().await;
    register(&h, "dave@example.com").await;

    let wrong = h
        .orchestrator
        .login("dave@example.com", "wrong-password", &home_client())
        .await
        .unwrap_err();
    let unknown = h
        .orchestrator
        .login("nobody@example.com", PASSWORD, &home_client())
        .await
        .unwrap_err();

    assert_eq!(wrong.code, ErrorCode::InvalidCredentials);
    assert_eq!(unknown.code, ErrorCode::InvalidCredentials);
    assert_eq!(wrong.code.description(), unknown.code.description());
}

#[tokio::test]
async fn test_unknown_account_costs_as_much_as_a_wrong_password() {
    const ROUNDS: u32 = 20;
    let h = harness().await;
    register(&h, "dana@example.com").await;
    let credentials = h.ctx().credentials();

    // Warm the blocking pool before measuring
    credentials.verify("nobody@example.com", PASSWORD).await.unwrap_err();

    let mut known = Duration::ZERO;
    let mut unknown = Duration::ZERO;
    for _ in 0..ROUNDS {
        let started = Instant::now();
        let err = credentials
            .verify("dana@example.com", "wrong-password")
            .await
            .unwrap_err();
        known += started.elapsed();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);

        let started = Instant::now();
        let err = credentials
            .verify("nobody@example.com", "wrong-password")
            .await
            .unwrap_err();
        unknown += started.elapsed();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
    }

    let known_mean = known / ROUNDS;
    let unknown_mean = unknown / ROUNDS;
    assert!(
        unknown_mean * 3 >= known_mean && known_mean * 3 >= unknown_mean,
        "existing account {known_mean:?} vs unknown account {unknown_mean:?}"
    );
}

#[tokio::test]
async fn test_two_factor_login_requires_code() {
    let h = harness().await;
    let user_id = register(&h, "erin@example.com").await;
    let (secret, backup_codes) = enable_two_factor(&h, user_id).await;
    assert_eq!(backup_codes.len(), 10);

    let outcome = h
        .orchestrator
        .login("erin@example.com", PASSWORD, &home_client())
        .await
        .unwrap();
    let LoginOutcome::TwoFactorRequired { pending } = outcome else {
        panic!("expected a second-factor challenge");
    };

    let err = h
        .orchestrator
        .complete_two_factor(&pending.token, &wrong_totp_code(&secret), &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCode);
    let stored = h.users.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(stored.backup_code_hashes.len(), 10);

    // Enabling used the current step; the next step is still inside the drift window
    let pair = h
        .orchestrator
        .complete_two_factor(&pending.token, &totp_code(&secret, 1), &home_client())
        .await
        .unwrap();
    let claims = h
        .ctx()
        .tokens()
        .verify_access(pair.access_token())
        .await
        .unwrap();
    assert_eq!(claims.subject_id().unwrap(), user_id);

    let replay = h
        .orchestrator
        .complete_two_factor(&pending.token, &totp_code(&secret, 1), &home_client())
        .await
        .unwrap_err();
    assert_eq!(replay.code, ErrorCode::InvalidToken);
}

#[tokio::test]
async fn test_unknown_location_waits_for_approval() {
    let h = harness_with_policy(LocationPolicy::Require).await;
    register(&h, "frank@example.com").await;

    let err = h
        .orchestrator
        .login("frank@example.com", PASSWORD, &travel_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ApprovalPending);

    let approval = h
        .mailer
        .last_token(MailKind::LoginApproval, "frank@example.com")
        .expect("approval mail sent");
    h.orchestrator
        .approve_location(&approval, &travel_client())
        .await
        .unwrap();

    let replay = h
        .orchestrator
        .approve_location(&approval, &travel_client())
        .await
        .unwrap_err();
    assert_eq!(replay.code, ErrorCode::InvalidToken);

    let outcome = h
        .orchestrator
        .login("frank@example.com", PASSWORD, &travel_client())
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
}

#[tokio::test]
async fn test_notify_only_policy_issues_tokens_and_sends_notice() {
    let h = harness_with_policy(LocationPolicy::NotifyOnly).await;
    register(&h, "grace@example.com").await;

    let outcome = h
        .orchestrator
        .login("grace@example.com", PASSWORD, &travel_client())
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    assert_eq!(h.mailer.count(MailKind::NewLoginNotice), 1);
    assert_eq!(h.mailer.count(MailKind::LoginApproval), 0);

    h.orchestrator
        .login("grace@example.com", PASSWORD, &travel_client())
        .await
        .unwrap();
    assert_eq!(h.mailer.count(MailKind::NewLoginNotice), 1);
}

#[tokio::test]
async fn test_seeded_user_trusts_first_location() {
    let h = harness().await;
    create_user_with_role(&h, "heidi@example.com", UserRole::User).await;

    let outcome = h
        .orchestrator
        .login("heidi@example.com", PASSWORD, &travel_client())
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
}

#[tokio::test]
async fn test_password_reset_replaces_password_and_ends_sessions() {
    let h = harness().await;
    let user_id = register(&h, "ivan@example.com").await;
    let pair = login_pair(&h, "ivan@example.com").await;

    h.orchestrator
        .request_password_reset("ivan@example.com", &home_client())
        .await
        .unwrap();
    let token = h
        .mailer
        .last_token(MailKind::PasswordReset, "ivan@example.com")
        .expect("reset mail sent");

    let err = h
        .orchestrator
        .reset_password(&token, "tiny", &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    h.orchestrator
        .reset_password(&token, "a-brand-new-secret", &home_client())
        .await
        .unwrap();

    let err = h
        .orchestrator
        .refresh(pair.refresh_token(), &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Revoked);

    let err = h
        .orchestrator
        .login("ivan@example.com", PASSWORD, &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCredentials);
    h.orchestrator
        .login("ivan@example.com", "a-brand-new-secret", &home_client())
        .await
        .unwrap();

    let replay = h
        .orchestrator
        .reset_password(&token, "another-secret", &home_client())
        .await
        .unwrap_err();
    assert_eq!(replay.code, ErrorCode::InvalidToken);

    let events = h.audit.events_of(AuditEventType::PasswordReset);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject_id, Some(user_id));
}

#[tokio::test]
async fn test_password_reset_request_for_unknown_email_is_silent() {
    let h = harness().await;
    h.orchestrator
        .request_password_reset("ghost@example.com", &home_client())
        .await
        .unwrap();
    assert_eq!(h.mailer.count(MailKind::PasswordReset), 0);
}

#[tokio::test]
async fn test_verify_token_checks_kind_and_revocation() {
    let h = harness().await;
    register(&h, "judy@example.com").await;
    let pair = login_pair(&h, "judy@example.com").await;

    let claims = h
        .orchestrator
        .verify_token(pair.access_token(), TokenKind::Access, &home_client())
        .await
        .unwrap();
    assert_eq!(claims.kind, TokenKind::Access);

    let err = h
        .orchestrator
        .verify_token(pair.access_token(), TokenKind::Refresh, &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidToken);

    h.orchestrator
        .refresh(pair.refresh_token(), &home_client())
        .await
        .unwrap();
    let err = h
        .orchestrator
        .verify_token(pair.access_token(), TokenKind::Access, &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Revoked);
}
