// ABOUTME: Tests for brute-force throttling of login and other gated flows
// ABOUTME: Verifies lockout after repeated failures, reset on success, and the per-IP ceiling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{
    harness_with, home_client, login_pair, register, test_auth_config, travel_client, PASSWORD,
};
use gatehouse::{
    auth::{ClientInfo, LoginOutcome, RateAction, RateKey, RateOutcome, TokenKind},
    config::RateGuardConfig,
    errors::ErrorCode,
};

fn strict_guard() -> RateGuardConfig {
    RateGuardConfig {
        max_failures: 3,
        base_lockout_secs: 60,
        max_lockout_secs: 600,
        window_secs: 300,
        ip_ceiling: 10_000,
    }
}

#[tokio::test]
async fn test_correct_password_is_refused_after_lockout() {
    let h = harness_with(test_auth_config(), strict_guard()).await;
    register(&h, "mallory@example.com").await;

    for _ in 0..3 {
        let err = h
            .orchestrator
            .login("mallory@example.com", "wrong-password", &home_client())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
    }

    let err = h
        .orchestrator
        .login("mallory@example.com", PASSWORD, &home_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimited);
    let retry = err.retry_after_secs.expect("retry hint");
    assert!(retry > 0 && retry <= 60);
}

#[tokio::test]
async fn test_lockout_follows_the_account_across_addresses() {
    let h = harness_with(test_auth_config(), strict_guard()).await;
    register(&h, "oscar@example.com").await;

    for _ in 0..3 {
        h.orchestrator
            .login("oscar@example.com", "wrong-password", &home_client())
            .await
            .unwrap_err();
    }

    let err = h
        .orchestrator
        .login("oscar@example.com", PASSWORD, &travel_client())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimited);

    // Other accounts are unaffected
    register(&h, "peggy@example.com").await;
    h.orchestrator
        .login("peggy@example.com", PASSWORD, &home_client())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_success_clears_failure_count() {
    let h = harness_with(test_auth_config(), strict_guard()).await;
    register(&h, "trent@example.com").await;

    for _ in 0..2 {
        h.orchestrator
            .login("trent@example.com", "wrong-password", &home_client())
            .await
            .unwrap_err();
    }
    h.orchestrator
        .login("trent@example.com", PASSWORD, &home_client())
        .await
        .unwrap();

    for _ in 0..2 {
        h.orchestrator
            .login("trent@example.com", "wrong-password", &home_client())
            .await
            .unwrap_err();
    }
    h.orchestrator
        .login("trent@example.com", PASSWORD, &home_client())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ip_ceiling_spans_accounts() {
    let rate_guard = RateGuardConfig {
        max_failures: 50,
        ip_ceiling: 5,
        ..strict_guard()
    };
    let h = harness_with(test_auth_config(), rate_guard).await;
    let sprayer = ClientInfo::new("192.0.2.99", "spray/1.0");

    for n in 0..5 {
        let err = h
            .orchestrator
            .login(&format!("victim{n}@example.com"), PASSWORD, &sprayer)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
    }

    let err = h
        .orchestrator
        .login("victim9@example.com", PASSWORD, &sprayer)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimited);
    assert!(err.retry_after_secs.is_some());
}

#[tokio::test]
async fn test_lockout_is_scoped_per_action() {
    let h = harness_with(test_auth_config(), strict_guard()).await;
    let guard = h.ctx().rate_guard();
    let key = RateKey::subject("walter@example.com", "203.0.113.7");

    for _ in 0..3 {
        guard.check(&key, RateAction::Login).await.unwrap();
        guard
            .record(&key, RateAction::Login, RateOutcome::Failure)
            .await
            .unwrap();
    }
    let first = guard.check(&key, RateAction::Login).await.unwrap_err();
    assert!(first.retry_after_secs.unwrap() <= 60);

    // Separate actions keep separate counters
    guard.check(&key, RateAction::PasswordReset).await.unwrap();
}

#[tokio::test]
async fn test_token_verification_does_not_drain_the_login_ceiling() {
    let h = harness_with(test_auth_config(), RateGuardConfig::default()).await;
    register(&h, "peggy@example.com").await;
    let pair = login_pair(&h, "peggy@example.com").await;

    let calls = RateGuardConfig::default().ip_ceiling + 20;
    for _ in 0..calls {
        h.orchestrator
            .verify_token(pair.access_token(), TokenKind::Access, &home_client())
            .await
            .unwrap();
    }

    let outcome = h
        .orchestrator
        .login("peggy@example.com", PASSWORD, &home_client())
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
}

#[tokio::test]
async fn test_failed_token_checks_still_count_toward_the_ceiling() {
    let rate_guard = RateGuardConfig {
        max_failures: 50,
        ip_ceiling: 5,
        ..strict_guard()
    };
    let h = harness_with(test_auth_config(), rate_guard).await;
    let guesser = ClientInfo::new("192.0.2.77", "guess/1.0");

    for n in 0..6 {
        let err = h
            .orchestrator
            .verify_token(&format!("forged.token.{n}"), TokenKind::Access, &guesser)
            .await
            .unwrap_err();
        assert_ne!(err.code, ErrorCode::RateLimited);
    }

    let err = h
        .orchestrator
        .login("anyone@example.com", PASSWORD, &guesser)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimited);
}

#[tokio::test]
async fn test_repeated_bad_tokens_lock_out_verification() {
    let h = harness_with(test_auth_config(), strict_guard()).await;
    let guesser = ClientInfo::new("192.0.2.78", "guess/1.0");

    for _ in 0..3 {
        h.orchestrator
            .verify_token("not-a-token", TokenKind::Access, &guesser)
            .await
            .unwrap_err();
    }
    let err = h
        .orchestrator
        .verify_token("not-a-token", TokenKind::Access, &guesser)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimited);
}
