// ABOUTME: Authentication components: signing keys, token envelope, throttling, credentials, and flows
// ABOUTME: Each component takes its collaborators through its constructor and holds no global state
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Organization-scoped API key tokens
pub mod api_keys;
/// Signed token envelope
pub mod codec;
/// Admin impersonation grants
pub mod impersonation;
/// New-location detection and email approval
pub mod location;
/// Public login, refresh, logout, and recovery flows
pub mod orchestrator;
/// Password hashing and credential verification
pub mod password;
/// Brute-force throttling
pub mod rate_guard;
/// Token revocation registry
pub mod revocation;
/// Signing key material and rotation
pub mod secrets;
/// Tokens redeemable exactly once
pub mod single_use;
/// Access/refresh pairs and session families
pub mod tokens;
/// TOTP and backup code second factor
pub mod two_factor;

pub use api_keys::{ApiKeyGrant, ApiKeyRestrictions, ApiKeyTokenIssuer};
pub use codec::{Claims, ClaimSet, IssuedToken, TokenCodec, TokenError, TokenKind, TokenSigner};
pub use impersonation::{ImpersonationGrant, ImpersonationService};
pub use location::{Fingerprint, FingerprintStatus, SessionApprovalManager};
pub use orchestrator::{AuthOrchestrator, ClientInfo, LoginOutcome};
pub use password::{CredentialVerifier, PasswordHasher, VerifiedCredentials};
pub use rate_guard::{RateAction, RateGuard, RateKey, RateOutcome};
pub use revocation::RevocationRegistry;
pub use secrets::SecretStore;
pub use single_use::SingleUseTokens;
pub use tokens::{Principal, TokenPair, TokenService};
pub use two_factor::{TwoFactorChallenge, TwoFactorEnrollment};
