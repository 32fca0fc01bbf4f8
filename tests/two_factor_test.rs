// ABOUTME: Tests for the second factor lifecycle and challenge completion
// ABOUTME: Covers enrollment, backup code single use, regeneration, expiry, and disabling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{
    enable_two_factor, harness, harness_with, home_client, register, relaxed_rate_guard,
    test_auth_config, totp_code, wrong_totp_code, TestHarness, PASSWORD,
};
use gatehouse::{
    auth::{two_factor::normalize_backup_code, IssuedToken, LoginOutcome},
    config::{AuthConfig, TokenTtlConfig},
    errors::ErrorCode,
    store::UserStore,
};

async fn pending_challenge(h: &TestHarness, email: &str) -> IssuedToken {
    match h
        .orchestrator
        .login(email, PASSWORD, &home_client())
        .await
        .unwrap()
    {
        LoginOutcome::TwoFactorRequired { pending } => pending,
        LoginOutcome::Authenticated(_) => panic!("expected a second-factor challenge"),
    }
}

#[tokio::test]
async fn test_enrollment_produces_scannable_secret() {
    let h = harness().await;
    let user_id = register(&h, "quinn@example.com").await;

    let enrollment = h.ctx().two_factor().enroll(user_id).await.unwrap();
    assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
    assert!(enrollment.otpauth_url.contains(&enrollment.secret));

    // Not enabled until confirmed
    let user = h.users.get_user(user_id).await.unwrap().unwrap();
    assert!(!user.two_factor_enabled);
    let outcome = h
        .orchestrator
        .login("quinn@example.com", PASSWORD, &home_client())
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));

    let err = h
        .ctx()
        .two_factor()
        .enable(user_id, &wrong_totp_code(&enrollment.secret))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCode);
}

#[tokio::test]
async fn test_enable_requires_enrollment_and_cannot_repeat() {
    let h = harness().await;
    let user_id = register(&h, "rupert@example.com").await;

    let err = h
        .ctx()
        .two_factor()
        .enable(user_id, "123456")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    enable_two_factor(&h, user_id).await;
    let err = h.ctx().two_factor().enroll(user_id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceAlreadyExists);
}

#[tokio::test]
async fn test_each_backup_code_works_once() {
    let h = harness().await;
    let user_id = register(&h, "sybil@example.com").await;
    let (_, codes) = enable_two_factor(&h, user_id).await;
    assert!(codes.iter().all(|code| normalize_backup_code(code).is_some()));

    let pending = pending_challenge(&h, "sybil@example.com").await;
    h.orchestrator
        .complete_two_factor(&pending.token, &codes[0], &home_client())
        .await
        .unwrap();
    let remaining = h.users.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(remaining.backup_code_hashes.len(), codes.len() - 1);

    let pending = pending_challenge(&h, "sybil@example.com").await;
    let err = h
        .orchestrator
        .complete_two_factor(&pending.token, &codes[0], &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCode);

    // The failed attempt leaves the challenge open; separators and case are ignored
    let relaxed = codes[1].replace('-', "").to_lowercase();
    h.orchestrator
        .complete_two_factor(&pending.token, &relaxed, &home_client())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_regenerating_backup_codes_invalidates_the_old_set() {
    let h = harness().await;
    let user_id = register(&h, "uma@example.com").await;
    let (_, old_codes) = enable_two_factor(&h, user_id).await;

    let new_codes = h
        .ctx()
        .two_factor()
        .regenerate_backup_codes(user_id)
        .await
        .unwrap();
    assert_eq!(new_codes.len(), old_codes.len());

    let pending = pending_challenge(&h, "uma@example.com").await;
    let err = h
        .orchestrator
        .complete_two_factor(&pending.token, &old_codes[0], &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCode);
    h.orchestrator
        .complete_two_factor(&pending.token, &new_codes[0], &home_client())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stale_challenge_is_reported_as_expired() {
    let auth = AuthConfig {
        ttl: TokenTtlConfig {
            two_factor_secs: 0,
            ..TokenTtlConfig::default()
        },
        ..test_auth_config()
    };
    let h = harness_with(auth, relaxed_rate_guard()).await;
    let user_id = register(&h, "victor@example.com").await;
    let (secret, _) = enable_two_factor(&h, user_id).await;

    let pending = pending_challenge(&h, "victor@example.com").await;
    let err = h
        .orchestrator
        .complete_two_factor(&pending.token, &totp_code(&secret, 1), &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ChallengeExpired);
}

#[tokio::test]
async fn test_pending_token_is_not_an_access_token() {
    let h = harness().await;
    let user_id = register(&h, "wendy@example.com").await;
    enable_two_factor(&h, user_id).await;

    let pending = pending_challenge(&h, "wendy@example.com").await;
    let err = h
        .ctx()
        .tokens()
        .authenticate(&pending.token)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidToken);
}

#[tokio::test]
async fn test_disable_turns_the_second_factor_off() {
    let h = harness().await;
    let user_id = register(&h, "xavier@example.com").await;
    let (secret, codes) = enable_two_factor(&h, user_id).await;

    let err = h
        .ctx()
        .two_factor()
        .disable(user_id, &wrong_totp_code(&secret))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCode);

    h.ctx()
        .two_factor()
        .disable(user_id, &codes[2])
        .await
        .unwrap();
    let user = h.users.get_user(user_id).await.unwrap().unwrap();
    assert!(!user.two_factor_enabled);
    assert!(user.two_factor_secret.is_none());
    assert!(user.backup_code_hashes.is_empty());

    let outcome = h
        .orchestrator
        .login("xavier@example.com", PASSWORD, &home_client())
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
}
