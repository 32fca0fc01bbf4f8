// ABOUTME: Authentication route handlers for registration, login, token rotation, and impersonation
// ABOUTME: Thin JSON handlers that resolve the client and delegate every decision to the orchestrator
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Authentication routes
//!
//! The whole surface is one explicit table in [`AuthRoutes::routes`].
//! Request and response bodies use camelCase and external ids.

use crate::auth::{AuthOrchestrator, ClientInfo, LoginOutcome, Principal, TokenKind, TokenPair};
use crate::errors::{AppError, AppResult};
use crate::models::Id;
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Client address and user agent of the current request
///
/// The IP is the socket peer unless `trusted_proxy_depth` proxies sit in
/// front of the service; then it is the `X-Forwarded-For` entry that many hops
/// from the end, the one the outermost trusted proxy appended. Entries further
/// left are client-supplied and never used.
#[derive(Debug, Clone)]
pub struct ClientContext(pub ClientInfo);

#[async_trait]
impl FromRequestParts<AuthOrchestrator> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        orchestrator: &AuthOrchestrator,
    ) -> Result<Self, Self::Rejection> {
        let depth = orchestrator.context().config().trusted_proxy_depth;
        let ip = forwarded_client_ip(&parts.headers, depth).unwrap_or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map_or_else(|| "unknown".to_owned(), |info| info.0.ip().to_string())
        });
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Ok(Self(ClientInfo::new(ip, user_agent)))
    }
}

/// The `X-Forwarded-For` entry written by the outermost of `depth` trusted proxies
fn forwarded_client_ip(headers: &HeaderMap, depth: usize) -> Option<String> {
    if depth == 0 {
        return None;
    }
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let hops: Vec<&str> = value.split(',').map(str::trim).collect();
    hops.get(hops.len().saturating_sub(depth))
        .filter(|hop| !hop.is_empty())
        .map(|hop| (*hop).to_owned())
}

/// Registration request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Login email
    pub email: String,
    /// Plain-text password
    pub password: String,
    /// Display name
    pub name: String,
}

/// Registration response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// New user
    pub user_id: Id,
}

/// Any request carrying a single emailed token
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    /// Token from the email link
    pub token: String,
}

/// Login request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Email address
    #[serde(alias = "email")]
    pub identifier: String,
    /// Plain-text password
    pub password: String,
}

/// Second-factor request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorRequest {
    /// Token from the login response
    pub pending_token: String,
    /// TOTP or backup code
    pub code: String,
}

/// Refresh or logout request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// Current refresh token
    pub refresh_token: String,
}

/// Location approval request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveLocationRequest {
    /// Token from the approval email
    pub approval_token: String,
}

/// Password reset link request
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    /// Account email
    pub email: String,
}

/// Password reset completion
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverRequest {
    /// Token from the reset email
    pub token: String,
    /// Replacement password
    pub new_password: String,
}

/// Generic verification request
#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    /// Token to check
    pub token: String,
    /// Kind it must be
    pub kind: TokenKind,
}

/// Issued access/refresh pair
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            expires_at: pair.access.expires_at(),
            access_token: pair.access.token,
            refresh_token: pair.refresh.token,
        }
    }
}

/// Login stopped at the second factor
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorPendingResponse {
    /// Present this with the code
    pub two_factor_token: String,
    /// When the challenge expires
    pub expires_at: DateTime<Utc>,
}

/// Impersonation grant
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpersonationResponse {
    /// Token acting as the target
    pub access_token: String,
    /// Hard expiry; grants are not renewable
    pub expires_at: DateTime<Utc>,
}

/// Verification result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenResponse {
    /// Always true; failures are errors
    pub verified: bool,
    /// Token subject
    pub subject: String,
    /// Token kind
    pub kind: TokenKind,
}

/// Plain acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Always true; failures are errors
    pub success: bool,
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::invalid_token("missing bearer token"))
}

const fn success() -> Json<SuccessResponse> {
    Json(SuccessResponse { success: true })
}

/// Authentication routes
pub struct AuthRoutes;

impl AuthRoutes {
    /// Create all authentication routes
    pub fn routes(orchestrator: AuthOrchestrator) -> Router {
        Router::new()
            .route("/auth/register", post(Self::handle_register))
            .route("/auth/verify-email", post(Self::handle_verify_email))
            .route("/auth/login", post(Self::handle_login))
            .route("/auth/2fa", post(Self::handle_two_factor))
            .route("/auth/verify-token", post(Self::handle_verify_token))
            .route("/auth/refresh", post(Self::handle_refresh))
            .route("/auth/logout", post(Self::handle_logout))
            .route("/auth/approve-location", post(Self::handle_approve_location))
            .route(
                "/auth/reset-password/request",
                post(Self::handle_reset_request),
            )
            .route(
                "/auth/reset-password/recover",
                post(Self::handle_reset_recover),
            )
            .route(
                "/auth/impersonate/:target_id",
                post(Self::handle_impersonate),
            )
            .route("/auth/impersonation/end", post(Self::handle_end_impersonation))
            .with_state(orchestrator)
    }

    /// Resolve the bearer token into a principal
    async fn authenticate(
        headers: &HeaderMap,
        orchestrator: &AuthOrchestrator,
        action: &str,
    ) -> AppResult<Principal> {
        orchestrator.authenticate(bearer_token(headers)?, action).await
    }

    async fn handle_register(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<RegisterRequest>,
    ) -> Result<Response, AppError> {
        let user_id = orchestrator
            .register(&request.email, &request.name, &request.password, &client)
            .await?;
        Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })).into_response())
    }

    async fn handle_verify_email(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<TokenRequest>,
    ) -> Result<Json<SuccessResponse>, AppError> {
        orchestrator.verify_email(&request.token, &client).await?;
        Ok(success())
    }

    async fn handle_login(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<LoginRequest>,
    ) -> Result<Response, AppError> {
        let outcome = orchestrator
            .login(&request.identifier, &request.password, &client)
            .await?;
        Ok(match outcome {
            LoginOutcome::TwoFactorRequired { pending } => Json(TwoFactorPendingResponse {
                expires_at: pending.expires_at(),
                two_factor_token: pending.token,
            })
            .into_response(),
            LoginOutcome::Authenticated(pair) => {
                Json(TokenPairResponse::from(pair)).into_response()
            }
        })
    }

    async fn handle_two_factor(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<TwoFactorRequest>,
    ) -> Result<Json<TokenPairResponse>, AppError> {
        let pair = orchestrator
            .complete_two_factor(&request.pending_token, &request.code, &client)
            .await?;
        Ok(Json(pair.into()))
    }

    async fn handle_verify_token(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<VerifyTokenRequest>,
    ) -> Result<Json<VerifyTokenResponse>, AppError> {
        let claims = orchestrator
            .verify_token(&request.token, request.kind, &client)
            .await?;
        Ok(Json(VerifyTokenResponse {
            verified: true,
            subject: claims.sub,
            kind: claims.kind,
        }))
    }

    async fn handle_refresh(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<RefreshRequest>,
    ) -> Result<Json<TokenPairResponse>, AppError> {
        let pair = orchestrator
            .refresh(&request.refresh_token, &client)
            .await?;
        Ok(Json(pair.into()))
    }

    async fn handle_logout(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<RefreshRequest>,
    ) -> Result<Json<SuccessResponse>, AppError> {
        orchestrator.logout(&request.refresh_token, &client).await?;
        Ok(success())
    }

    async fn handle_approve_location(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<ApproveLocationRequest>,
    ) -> Result<Json<SuccessResponse>, AppError> {
        orchestrator
            .approve_location(&request.approval_token, &client)
            .await?;
        Ok(success())
    }

    async fn handle_reset_request(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<ResetRequest>,
    ) -> Result<Json<serde_json::Value>, AppError> {
        orchestrator
            .request_password_reset(&request.email, &client)
            .await?;
        Ok(Json(serde_json::json!({ "queued": true })))
    }

    async fn handle_reset_recover(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Json(request): Json<RecoverRequest>,
    ) -> Result<Json<SuccessResponse>, AppError> {
        orchestrator
            .reset_password(&request.token, &request.new_password, &client)
            .await?;
        Ok(success())
    }

    async fn handle_impersonate(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        Path(target_id): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<ImpersonationResponse>, AppError> {
        let principal = Self::authenticate(&headers, &orchestrator, "impersonate").await?;
        let target_id = Id::from_external(&target_id)?;
        let grant = orchestrator
            .impersonate(&principal, target_id, &client)
            .await?;
        Ok(Json(ImpersonationResponse {
            expires_at: grant.token.expires_at(),
            access_token: grant.token.token,
        }))
    }

    async fn handle_end_impersonation(
        State(orchestrator): State<AuthOrchestrator>,
        ClientContext(client): ClientContext,
        headers: HeaderMap,
    ) -> Result<Json<SuccessResponse>, AppError> {
        orchestrator
            .end_impersonation(bearer_token(&headers)?, &client)
            .await?;
        Ok(success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_forwarded_chain_is_read_from_the_trusted_end() {
        let headers = forwarded("1.1.1.1, 198.51.100.9, 10.0.0.2");
        assert_eq!(forwarded_client_ip(&headers, 0), None);
        assert_eq!(forwarded_client_ip(&headers, 1).as_deref(), Some("10.0.0.2"));
        assert_eq!(forwarded_client_ip(&headers, 2).as_deref(), Some("198.51.100.9"));
        assert_eq!(forwarded_client_ip(&headers, 5).as_deref(), Some("1.1.1.1"));
    }

    #[test]
    fn test_missing_or_empty_forwarded_entry_falls_back() {
        assert_eq!(forwarded_client_ip(&HeaderMap::new(), 1), None);
        assert_eq!(forwarded_client_ip(&forwarded("198.51.100.9, "), 1), None);
    }
}
