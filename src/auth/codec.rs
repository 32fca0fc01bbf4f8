// ABOUTME: Signed token envelope shared by every token kind, with HS256 signing behind a TokenSigner seam
// ABOUTME: Verification rejects bad signatures, foreign issuers, expired tokens, and kind confusion
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Token Codec
//!
//! Every token the service hands out, from access tokens to password reset
//! links, is the same compact JWS envelope carrying a `kind` claim. Verifying
//! against an expected kind is what stops an API key token from being accepted
//! where a user access token is required.
//!
//! Expiry is checked by the codec rather than by `jsonwebtoken` so an expired
//! token can be reported distinctly (two-factor challenges map it to
//! `ChallengeExpired`).

use super::api_keys::ApiKeyRestrictions;
use super::secrets::SecretStore;
use crate::config::AuthConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Id;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Discriminates what a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// Short-lived API access for a user session
    #[serde(rename = "access")]
    Access,
    /// Long-lived, single-use credential exchanged for a new pair
    #[serde(rename = "refresh")]
    Refresh,
    /// Organization-bound API key
    #[serde(rename = "apikey")]
    ApiKey,
    /// Password verified, second factor outstanding
    #[serde(rename = "2fa-pending")]
    TwoFactorPending,
    /// Emailed new-location approval
    #[serde(rename = "approval")]
    Approval,
    /// Actor acting as another user
    #[serde(rename = "impersonation")]
    Impersonation,
    /// Emailed address confirmation
    #[serde(rename = "email-verify")]
    EmailVerify,
    /// Emailed password reset
    #[serde(rename = "password-reset")]
    PasswordReset,
}

impl TokenKind {
    /// Wire name of the kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::ApiKey => "apikey",
            Self::TwoFactorPending => "2fa-pending",
            Self::Approval => "approval",
            Self::Impersonation => "impersonation",
            Self::EmailVerify => "email-verify",
            Self::PasswordReset => "password-reset",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Self::Access),
            "refresh" => Ok(Self::Refresh),
            "apikey" => Ok(Self::ApiKey),
            "2fa-pending" => Ok(Self::TwoFactorPending),
            "approval" => Ok(Self::Approval),
            "impersonation" => Ok(Self::Impersonation),
            "email-verify" => Ok(Self::EmailVerify),
            "password-reset" => Ok(Self::PasswordReset),
            other => Err(AppError::invalid_input(format!(
                "Unknown token kind '{other}'"
            ))),
        }
    }
}

/// Claims carried by every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: external user id, or API key id for `apikey` tokens
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Unique token id, the revocation handle
    pub jti: String,
    /// Token kind
    pub kind: TokenKind,
    /// Granted scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Session family id (access/refresh)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Rotation generation within the session family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen: Option<u64>,
    /// Acting user when impersonating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<String>,
    /// Device/location fingerprint hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fph: Option<String>,
    /// Owning organization (API keys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    /// Caller restrictions (API keys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rst: Option<ApiKeyRestrictions>,
}

impl Claims {
    /// Subject decoded as an [`Id`]
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the subject is not an id
    pub fn subject_id(&self) -> AppResult<Id> {
        Id::from_external(&self.sub)
            .map_err(|_| AppError::invalid_token("token subject is not an id"))
    }

    /// Actor decoded as an [`Id`], if present
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the actor claim is not an id
    pub fn actor_id(&self) -> AppResult<Option<Id>> {
        self.act
            .as_deref()
            .map(|actor| {
                Id::from_external(actor)
                    .map_err(|_| AppError::invalid_token("token actor is not an id"))
            })
            .transpose()
    }

    /// Expiry as a timestamp
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }

    /// Lifetime left, zero once expired
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at() - Utc::now()).max(Duration::zero())
    }
}

/// Kind-specific claims supplied at issuance; the codec fills in the envelope
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    subject: String,
    scopes: Vec<String>,
    session_id: Option<String>,
    generation: Option<u64>,
    actor: Option<String>,
    fingerprint: Option<String>,
    organization: Option<String>,
    restrictions: Option<ApiKeyRestrictions>,
}

impl ClaimSet {
    /// Claims about `subject`
    #[must_use]
    pub fn for_subject(subject: &Id) -> Self {
        Self {
            subject: subject.to_external(),
            ..Self::default()
        }
    }

    /// Attach scopes
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Attach a session family and generation
    #[must_use]
    pub fn with_session(mut self, session_id: &str, generation: u64) -> Self {
        self.session_id = Some(session_id.to_owned());
        self.generation = Some(generation);
        self
    }

    /// Attach the acting user
    #[must_use]
    pub fn with_actor(mut self, actor: &Id) -> Self {
        self.actor = Some(actor.to_external());
        self
    }

    /// Attach a fingerprint hash
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = Some(fingerprint.to_owned());
        self
    }

    /// Attach the owning organization
    #[must_use]
    pub fn with_organization(mut self, organization: &Id) -> Self {
        self.organization = Some(organization.to_external());
        self
    }

    /// Attach caller restrictions
    #[must_use]
    pub fn with_restrictions(mut self, restrictions: ApiKeyRestrictions) -> Self {
        self.restrictions = Some(restrictions);
        self
    }
}

/// A signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact serialized token
    pub token: String,
    /// Claims inside it
    pub claims: Claims,
}

impl IssuedToken {
    /// Token id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.claims.jti
    }

    /// Expiry
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

/// Why a token failed verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Past its `exp`
    #[error("token expired at {0}")]
    Expired(DateTime<Utc>),
    /// No current key verifies the signature
    #[error("token signature verification failed")]
    BadSignature,
    /// Valid token of another kind
    #[error("expected {expected} token, found {found}")]
    WrongKind {
        /// Kind the caller required
        expected: String,
        /// Kind the token carries
        found: TokenKind,
    },
    /// Not a well-formed token, or issued for another issuer/audience
    #[error("token is malformed: {0}")]
    Malformed(String),
    /// Signing failed
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<TokenError> for AppError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Signing(detail) => Self::internal(format!("token signing failed: {detail}")),
            other => Self::invalid_token(other.to_string()),
        }
    }
}

/// Signs and checks token envelopes; the seam tests fake
pub trait TokenSigner: Send + Sync {
    /// Sign claims into a compact token
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if no key is available or encoding fails
    fn sign(&self, claims: &Claims) -> Result<String, TokenError>;

    /// Check the signature and structure and return the claims
    ///
    /// Does not check expiry, issuer, audience, or kind.
    ///
    /// # Errors
    ///
    /// Returns `BadSignature` or `Malformed`
    fn open(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 signer over the [`SecretStore`]
pub struct JwtSigner {
    secrets: Arc<SecretStore>,
}

impl JwtSigner {
    /// Create a signer over the given keys
    #[must_use]
    pub const fn new(secrets: Arc<SecretStore>) -> Self {
        Self { secrets }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation
    }

    fn convert_jwt_error(e: &jsonwebtoken::errors::Error) -> TokenError {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidToken => TokenError::Malformed("token format is invalid".to_owned()),
            ErrorKind::Base64(base64_err) => {
                TokenError::Malformed(format!("invalid base64: {base64_err}"))
            }
            ErrorKind::Json(json_err) => TokenError::Malformed(format!("invalid JSON: {json_err}")),
            ErrorKind::Utf8(utf8_err) => TokenError::Malformed(format!("invalid UTF-8: {utf8_err}")),
            ErrorKind::InvalidAlgorithm => TokenError::Malformed("unexpected algorithm".to_owned()),
            _ => TokenError::Malformed(format!("token validation failed: {e}")),
        }
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let key = self
            .secrets
            .active()
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(key.kid().to_owned());

        encode(&header, claims, &key.encoding_key()).map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn open(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token)
            .map_err(|e| TokenError::Malformed(format!("failed to decode token header: {e}")))?;

        let keys = self
            .secrets
            .verification_keys(header.kid.as_deref())
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        let validation = Self::validation();
        for key in keys {
            match decode::<Claims>(token, &key.decoding_key(), &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {
                    debug!(kid = %key.kid(), "signature did not verify, trying next key");
                }
                Err(e) => return Err(Self::convert_jwt_error(&e)),
            }
        }
        Err(TokenError::BadSignature)
    }
}

/// Issues and verifies tokens of every kind
#[derive(Clone)]
pub struct TokenCodec {
    signer: Arc<dyn TokenSigner>,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    /// Create a codec over any signer
    #[must_use]
    pub fn new(signer: Arc<dyn TokenSigner>, issuer: &str, audience: &str) -> Self {
        Self {
            signer,
            issuer: issuer.to_owned(),
            audience: audience.to_owned(),
        }
    }

    /// Create the production HS256 codec
    #[must_use]
    pub fn jwt(secrets: Arc<SecretStore>, config: &AuthConfig) -> Self {
        Self::new(
            Arc::new(JwtSigner::new(secrets)),
            &config.issuer,
            &config.audience,
        )
    }

    /// Sign a new token of `kind` that lives for `ttl`
    ///
    /// # Errors
    ///
    /// Returns an internal error if signing fails
    pub fn issue(&self, claims: ClaimSet, kind: TokenKind, ttl: Duration) -> AppResult<IssuedToken> {
        let now = Utc::now();
        let claims = Claims {
            sub: claims.subject,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            kind,
            scopes: claims.scopes,
            sid: claims.session_id,
            gen: claims.generation,
            act: claims.actor,
            fph: claims.fingerprint,
            org: claims.organization,
            rst: claims.restrictions,
        };
        let token = self.signer.sign(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify a token that must be of `expected` kind
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` on bad signature, expiry, wrong kind, or malformed input
    pub fn verify(&self, token: &str, expected: TokenKind) -> AppResult<Claims> {
        Ok(self.verify_detailed(token, &[expected])?)
    }

    /// Verify a token that may be of any of the `accepted` kinds
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` on bad signature, expiry, wrong kind, or malformed input
    pub fn verify_any(&self, token: &str, accepted: &[TokenKind]) -> AppResult<Claims> {
        Ok(self.verify_detailed(token, accepted)?)
    }

    /// Verify and report the precise failure
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] describing the first failed check
    pub fn verify_detailed(
        &self,
        token: &str,
        accepted: &[TokenKind],
    ) -> Result<Claims, TokenError> {
        let claims = self.signer.open(token.trim()).inspect_err(|e| {
            warn!(reason = %e, "token failed signature check");
        })?;

        if claims.iss != self.issuer || claims.aud != self.audience {
            warn!(iss = %claims.iss, aud = %claims.aud, "token issued for another service");
            return Err(TokenError::Malformed("issuer or audience mismatch".to_owned()));
        }

        if !accepted.contains(&claims.kind) {
            let expected = accepted
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join("|");
            warn!(expected = %expected, found = %claims.kind, "token kind mismatch");
            return Err(TokenError::WrongKind {
                expected,
                found: claims.kind,
            });
        }

        let now = Utc::now();
        if claims.exp <= now.timestamp() {
            debug!(kind = %claims.kind, jti = %claims.jti, "token expired");
            return Err(TokenError::Expired(claims.expires_at()));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        let secrets = Arc::new(SecretStore::generate(Duration::days(1)).unwrap());
        TokenCodec::jwt(secrets, &AuthConfig::default())
    }

    #[test]
    fn test_kind_confusion_rejected() {
        let codec = codec();
        let issued = codec
            .issue(
                ClaimSet::for_subject(&Id::new()),
                TokenKind::ApiKey,
                Duration::minutes(5),
            )
            .unwrap();
        let err = codec.verify_detailed(&issued.token, &[TokenKind::Access]).unwrap_err();
        assert!(matches!(err, TokenError::WrongKind { .. }));
    }

    #[test]
    fn test_expired_reported_distinctly() {
        let codec = codec();
        let issued = codec
            .issue(
                ClaimSet::for_subject(&Id::new()),
                TokenKind::TwoFactorPending,
                Duration::seconds(-5),
            )
            .unwrap();
        let err = codec
            .verify_detailed(&issued.token, &[TokenKind::TwoFactorPending])
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired(_)));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let issued = codec()
            .issue(
                ClaimSet::for_subject(&Id::new()),
                TokenKind::Access,
                Duration::minutes(5),
            )
            .unwrap();
        let err = codec()
            .verify_detailed(&issued.token, &[TokenKind::Access])
            .unwrap_err();
        assert_eq!(err, TokenError::BadSignature);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = codec()
            .verify_detailed("not.a.token", &[TokenKind::Access])
            .unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }
}
