// ABOUTME: Authentication context wiring every auth component to the shared cache, store, and collaborators
// ABOUTME: Built once at startup and cloned into handlers; components receive dependencies by constructor
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::audit::{AuditSink, TracingAuditSink};
use crate::auth::{
    ApiKeyTokenIssuer, CredentialVerifier, ImpersonationService, PasswordHasher, RateGuard,
    RevocationRegistry, SecretStore, SessionApprovalManager, SingleUseTokens, TokenCodec,
    TokenService, TwoFactorChallenge,
};
use crate::cache::Cache;
use crate::config::{AuthConfig, RateGuardConfig};
use crate::errors::AppResult;
use crate::notifications::{Mailer, TracingMailer};
use crate::permissions::{RoleAuthority, StoreRoleAuthority};
use crate::store::UserStore;
use std::sync::Arc;

/// External collaborators the auth core talks to
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Outbound email; logs only when unset
    pub mailer: Option<Arc<dyn Mailer>>,
    /// Audit trail; tracing target when unset
    pub audit: Option<Arc<dyn AuditSink>>,
    /// Role lookups; the user store's recorded role when unset
    pub roles: Option<Arc<dyn RoleAuthority>>,
    /// Signing keys; built from the auth config when unset
    pub secrets: Option<Arc<SecretStore>>,
}

/// Authentication context containing every auth component
///
/// # Dependencies
/// - `cache`: ephemeral state for revocations, sessions, counters, and single-use markers
/// - `users`: durable user records
/// - `secrets`: signing keys shared by every token kind
#[derive(Clone)]
pub struct AuthContext {
    config: Arc<AuthConfig>,
    cache: Cache,
    users: Arc<dyn UserStore>,
    secrets: Arc<SecretStore>,
    codec: TokenCodec,
    revocations: RevocationRegistry,
    rate_guard: RateGuard,
    hasher: PasswordHasher,
    credentials: CredentialVerifier,
    single_use: SingleUseTokens,
    two_factor: TwoFactorChallenge,
    approvals: SessionApprovalManager,
    tokens: TokenService,
    api_keys: ApiKeyTokenIssuer,
    impersonation: ImpersonationService,
    mailer: Arc<dyn Mailer>,
    audit: Arc<dyn AuditSink>,
}

impl AuthContext {
    /// Wire every component
    ///
    /// # Errors
    ///
    /// Returns a config error if the key retention, signing secret, or hashing cost is invalid
    pub fn build(
        config: AuthConfig,
        rate_guard: RateGuardConfig,
        cache: Cache,
        users: Arc<dyn UserStore>,
        collaborators: Collaborators,
    ) -> AppResult<Self> {
        config.validate()?;
        let secrets = match collaborators.secrets {
            Some(secrets) => secrets,
            None => {
                let retention = config.key_retention();
                Arc::new(match &config.signing_secret {
                    Some(secret) => SecretStore::from_secret(secret, retention)?,
                    None => SecretStore::generate(retention)?,
                })
            }
        };
        let mailer = collaborators
            .mailer
            .unwrap_or_else(|| Arc::new(TracingMailer));
        let audit = collaborators
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink));
        let roles = collaborators
            .roles
            .unwrap_or_else(|| Arc::new(StoreRoleAuthority::new(users.clone())));

        let codec = TokenCodec::jwt(secrets.clone(), &config);
        let revocations = RevocationRegistry::new(Arc::new(cache.clone()));
        let rate_guard = RateGuard::new(Arc::new(cache.clone()), rate_guard);
        let hasher = PasswordHasher::new(config.password_hash)?;
        let credentials = CredentialVerifier::new(users.clone(), hasher.clone());
        let single_use = SingleUseTokens::new(codec.clone(), cache.clone());
        let two_factor = TwoFactorChallenge::new(
            single_use.clone(),
            cache.clone(),
            users.clone(),
            hasher.clone(),
            config.ttl.two_factor(),
            &config.totp_issuer,
        );
        let approvals =
            SessionApprovalManager::new(users.clone(), single_use.clone(), config.ttl.approval());
        let tokens = TokenService::new(
            codec.clone(),
            revocations.clone(),
            cache.clone(),
            config.ttl.access(),
            config.ttl.refresh(),
        );
        let api_keys = ApiKeyTokenIssuer::new(
            codec.clone(),
            revocations.clone(),
            cache.clone(),
            config.ttl.api_key(),
            config.key_retention(),
        );
        let impersonation = ImpersonationService::new(
            codec.clone(),
            revocations.clone(),
            tokens.clone(),
            users.clone(),
            roles,
            audit.clone(),
            config.ttl.impersonation(),
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            users,
            secrets,
            codec,
            revocations,
            rate_guard,
            hasher,
            credentials,
            single_use,
            two_factor,
            approvals,
            tokens,
            api_keys,
            impersonation,
            mailer,
            audit,
        })
    }

    /// Auth configuration
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Ephemeral cache
    #[must_use]
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    /// User store
    #[must_use]
    pub const fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Signing keys, for rotation
    #[must_use]
    pub const fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    /// Token envelope
    #[must_use]
    pub const fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Revocation registry
    #[must_use]
    pub const fn revocations(&self) -> &RevocationRegistry {
        &self.revocations
    }

    /// Brute-force throttling
    #[must_use]
    pub const fn rate_guard(&self) -> &RateGuard {
        &self.rate_guard
    }

    /// Password hasher
    #[must_use]
    pub const fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Password verification
    #[must_use]
    pub const fn credentials(&self) -> &CredentialVerifier {
        &self.credentials
    }

    /// Single-use token issuance
    #[must_use]
    pub const fn single_use(&self) -> &SingleUseTokens {
        &self.single_use
    }

    /// Second factor
    #[must_use]
    pub const fn two_factor(&self) -> &TwoFactorChallenge {
        &self.two_factor
    }

    /// New-location approval
    #[must_use]
    pub const fn approvals(&self) -> &SessionApprovalManager {
        &self.approvals
    }

    /// Access/refresh sessions
    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// API key tokens
    #[must_use]
    pub const fn api_keys(&self) -> &ApiKeyTokenIssuer {
        &self.api_keys
    }

    /// Impersonation grants
    #[must_use]
    pub const fn impersonation(&self) -> &ImpersonationService {
        &self.impersonation
    }

    /// Outbound email
    #[must_use]
    pub const fn mailer(&self) -> &Arc<dyn Mailer> {
        &self.mailer
    }

    /// Audit trail
    #[must_use]
    pub const fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }
}
