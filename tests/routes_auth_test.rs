// ABOUTME: HTTP-level tests for the authentication and health routes
// ABOUTME: Drives the merged router in-process and checks status codes, bodies, and headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use axum::{http::StatusCode, Router};
use common::{
    create_user_with_role, harness, harness_with, test_auth_config, MailKind, TestHarness,
    PASSWORD,
};
use gatehouse::{
    audit::AuditEventType,
    config::{AuthConfig, RateGuardConfig},
    errors::ErrorCode,
    models::{Id, UserRole},
    routes,
    routes::auth::{RegisterResponse, TokenPairResponse},
};
use helpers::axum_test::AxumTestRequest;
use serde_json::{json, Value};

const IP: &str = "203.0.113.7";
const AGENT: &str = "gatehouse-tests/1.0";

fn app(h: &TestHarness) -> Router {
    routes::router(h.orchestrator.clone())
}

async fn http_login(h: &TestHarness, email: &str) -> TokenPairResponse {
    AxumTestRequest::post("/auth/login")
        .client(IP, AGENT)
        .json(&json!({ "email": email, "password": PASSWORD }))
        .send(app(h))
        .await
        .assert_status(StatusCode::OK)
        .json()
}

#[tokio::test]
async fn test_health_reports_cache_backend() {
    let h = harness().await;
    let body: Value = AxumTestRequest::get("/health")
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache"], "memory");
}

#[tokio::test]
async fn test_register_login_refresh_logout_over_http() {
    let h = harness().await;

    let registered: RegisterResponse = AxumTestRequest::post("/auth/register")
        .client(IP, AGENT)
        .json(&json!({
            "email": "http@example.com",
            "password": PASSWORD,
            "name": "Http User"
        }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::CREATED)
        .json();

    let verify = h
        .mailer
        .last_token(MailKind::EmailVerification, "http@example.com")
        .unwrap();
    AxumTestRequest::post("/auth/verify-email")
        .client(IP, AGENT)
        .json(&json!({ "token": verify }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK);

    let pair = http_login(&h, "http@example.com").await;

    let verified: Value = AxumTestRequest::post("/auth/verify-token")
        .client(IP, AGENT)
        .json(&json!({ "token": pair.access_token, "kind": "access" }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK)
        .json();
    assert_eq!(verified["verified"], true);
    assert_eq!(verified["subject"], registered.user_id.to_external());

    let rotated: TokenPairResponse = AxumTestRequest::post("/auth/refresh")
        .client(IP, AGENT)
        .json(&json!({ "refreshToken": pair.refresh_token }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK)
        .json();

    AxumTestRequest::post("/auth/logout")
        .client(IP, AGENT)
        .json(&json!({ "refreshToken": rotated.refresh_token }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK);

    let body: Value = AxumTestRequest::post("/auth/refresh")
        .client(IP, AGENT)
        .json(&json!({ "refreshToken": rotated.refresh_token }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED)
        .json();
    assert_eq!(body["code"], "REVOKED");
}

#[tokio::test]
async fn test_login_failure_body_is_uniform() {
    let h = harness().await;
    create_user_with_role(&h, "known@example.com", UserRole::User).await;

    let wrong: Value = AxumTestRequest::post("/auth/login")
        .client(IP, AGENT)
        .json(&json!({ "identifier": "known@example.com", "password": "nope-nope-nope" }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED)
        .json();
    let unknown: Value = AxumTestRequest::post("/auth/login")
        .client(IP, AGENT)
        .json(&json!({ "identifier": "missing@example.com", "password": PASSWORD }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED)
        .json();

    assert_eq!(wrong, unknown);
    assert_eq!(wrong["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_rate_limited_response_carries_retry_after() {
    let rate_guard = RateGuardConfig {
        max_failures: 1,
        ..RateGuardConfig::default()
    };
    let h = harness_with(test_auth_config(), rate_guard).await;
    create_user_with_role(&h, "target@example.com", UserRole::User).await;

    let attempt = || {
        AxumTestRequest::post("/auth/login")
            .client(IP, AGENT)
            .json(&json!({ "email": "target@example.com", "password": "bad-password" }))
    };
    attempt()
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let limited = attempt()
        .send(app(&h))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited.header("retry-after").unwrap().parse().unwrap();
    assert!(retry_after > 0);
    let body: Value = limited.json();
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["retry_after"], retry_after);
}

#[tokio::test]
async fn test_impersonation_requires_bearer_and_elevation() {
    let h = harness().await;
    create_user_with_role(&h, "root@example.com", UserRole::SuperAdmin).await;
    create_user_with_role(&h, "plain@example.com", UserRole::User).await;
    let target = create_user_with_role(&h, "member@example.com", UserRole::User).await;
    let uri = format!("/auth/impersonate/{}", target.to_external());

    AxumTestRequest::post(&uri)
        .client(IP, AGENT)
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let plain = http_login(&h, "plain@example.com").await;
    let body: Value = AxumTestRequest::post(&uri)
        .client(IP, AGENT)
        .bearer(&plain.access_token)
        .send(app(&h))
        .await
        .assert_status(StatusCode::FORBIDDEN)
        .json();
    assert_eq!(body["code"], "INSUFFICIENT_PERMISSION");

    let root = http_login(&h, "root@example.com").await;
    let grant: Value = AxumTestRequest::post(&uri)
        .client(IP, AGENT)
        .bearer(&root.access_token)
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK)
        .json();
    let principal = h
        .orchestrator
        .authenticate(grant["accessToken"].as_str().unwrap(), "test")
        .await
        .unwrap();
    assert_eq!(principal.user_id, target);

    AxumTestRequest::post(&format!("/auth/impersonate/{}", Id::new().to_external()))
        .client(IP, AGENT)
        .bearer(&root.access_token)
        .send(app(&h))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ending_impersonation_revokes_the_grant() {
    let h = harness().await;
    create_user_with_role(&h, "root@example.com", UserRole::SuperAdmin).await;
    let target = create_user_with_role(&h, "member@example.com", UserRole::User).await;
    let root = http_login(&h, "root@example.com").await;

    let grant: Value = AxumTestRequest::post(&format!("/auth/impersonate/{}", target.to_external()))
        .client(IP, AGENT)
        .bearer(&root.access_token)
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK)
        .json();
    let grant_token = grant["accessToken"].as_str().unwrap();

    AxumTestRequest::post("/auth/impersonation/end")
        .client(IP, AGENT)
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    AxumTestRequest::post("/auth/impersonation/end")
        .client(IP, AGENT)
        .bearer(grant_token)
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK);

    let err = h
        .orchestrator
        .authenticate(grant_token, "test")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Revoked);
    assert_eq!(h.audit.events_of(AuditEventType::ImpersonationEnded).len(), 1);

    // A regular access token is not an impersonation grant
    AxumTestRequest::post("/auth/impersonation/end")
        .client(IP, AGENT)
        .bearer(&root.access_token)
        .send(app(&h))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_request_never_reveals_accounts() {
    let h = harness().await;
    create_user_with_role(&h, "real@example.com", UserRole::User).await;

    for email in ["real@example.com", "ghost@example.com"] {
        let body: Value = AxumTestRequest::post("/auth/reset-password/request")
            .client(IP, AGENT)
            .json(&json!({ "email": email }))
            .send(app(&h))
            .await
            .assert_status(StatusCode::OK)
            .json();
        assert_eq!(body, json!({ "queued": true }));
    }
    assert_eq!(h.mailer.count(MailKind::PasswordReset), 1);

    let token = h
        .mailer
        .last_token(MailKind::PasswordReset, "real@example.com")
        .unwrap();
    AxumTestRequest::post("/auth/reset-password/recover")
        .client(IP, AGENT)
        .json(&json!({ "token": token, "newPassword": "fresh-password-1" }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_location_gets_forbidden_then_approval_works() {
    let h = common::harness_with_policy(gatehouse::config::LocationPolicy::Require).await;
    create_user_with_role(&h, "roamer@example.com", UserRole::User).await;
    // First sight trusts the home client
    http_login(&h, "roamer@example.com").await;

    let body: Value = AxumTestRequest::post("/auth/login")
        .client("198.51.100.42", "roaming/2.0")
        .json(&json!({ "email": "roamer@example.com", "password": PASSWORD }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::FORBIDDEN)
        .json();
    assert_eq!(body["code"], "APPROVAL_PENDING");

    let approval = h
        .mailer
        .last_token(MailKind::LoginApproval, "roamer@example.com")
        .unwrap();
    AxumTestRequest::post("/auth/approve-location")
        .client("198.51.100.42", "roaming/2.0")
        .json(&json!({ "approvalToken": approval }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK);

    AxumTestRequest::post("/auth/login")
        .client("198.51.100.42", "roaming/2.0")
        .json(&json!({ "email": "roamer@example.com", "password": PASSWORD }))
        .send(app(&h))
        .await
        .assert_status(StatusCode::OK);
}

fn ceiling_config(trusted_proxy_depth: usize) -> (AuthConfig, RateGuardConfig) {
    let auth = AuthConfig {
        trusted_proxy_depth,
        ..test_auth_config()
    };
    let rate_guard = RateGuardConfig {
        max_failures: 50,
        ip_ceiling: 3,
        ..RateGuardConfig::default()
    };
    (auth, rate_guard)
}

async fn count_rate_limited(h: &TestHarness, request: impl Fn(u32) -> AxumTestRequest) -> usize {
    let mut limited = 0;
    for n in 0..20 {
        let response = request(n)
            .json(&json!({ "email": format!("user{n}@example.com"), "password": "bad-password" }))
            .send(app(h))
            .await;
        if response.status() == StatusCode::TOO_MANY_REQUESTS.as_u16() {
            limited += 1;
        }
    }
    limited
}

#[tokio::test]
async fn test_forwarded_header_is_ignored_without_trusted_proxies() {
    let (auth, rate_guard) = ceiling_config(0);
    let h = harness_with(auth, rate_guard).await;

    let limited = count_rate_limited(&h, |n| {
        AxumTestRequest::post("/auth/login")
            .peer("203.0.113.50")
            .client(&format!("198.51.100.{n}"), AGENT)
    })
    .await;
    assert_eq!(limited, 17);
}

#[tokio::test]
async fn test_only_the_trusted_hop_of_the_forwarded_chain_counts() {
    let (auth, rate_guard) = ceiling_config(1);
    let h = harness_with(auth, rate_guard).await;

    // The proxy appends the real peer; anything before it is caller-supplied
    let limited = count_rate_limited(&h, |n| {
        AxumTestRequest::post("/auth/login")
            .peer("10.0.0.2")
            .header("x-forwarded-for", &format!("198.51.100.{n}, {IP}"))
            .header("user-agent", AGENT)
    })
    .await;
    assert_eq!(limited, 17);
}

#[tokio::test]
async fn test_distinct_trusted_clients_keep_separate_ceilings() {
    let (auth, rate_guard) = ceiling_config(1);
    let h = harness_with(auth, rate_guard).await;

    let limited = count_rate_limited(&h, |n| {
        AxumTestRequest::post("/auth/login")
            .peer("10.0.0.2")
            .client(&format!("198.51.100.{n}"), AGENT)
    })
    .await;
    assert_eq!(limited, 0);
}
