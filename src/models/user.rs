// ABOUTME: User account model with credential, two-factor, and known-location state
// ABOUTME: Owned by the user store and mutated only through the auth components
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::Id;
use crate::constants::credentials::MIN_NAME_LEN;
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Account role; only elevated roles may impersonate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular account
    #[default]
    User,
    /// Organization administrator
    Admin,
    /// Platform operator
    SuperAdmin,
}

impl UserRole {
    /// Whether this role may act on behalf of other users
    #[must_use]
    pub const fn is_elevated(self) -> bool {
        matches!(self, Self::SuperAdmin)
    }

    /// Stable string form used in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(AppError::internal(format!("Unknown user role '{other}'"))),
        }
    }
}

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Identity
    pub id: Id,
    /// Login identifier, stored lowercased
    pub email: String,
    /// Display name
    pub name: String,
    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Account role
    pub role: UserRole,
    /// Whether the email verification link was used
    pub email_verified: bool,
    /// Base32 TOTP secret, present once enrollment started
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<String>,
    /// Whether logins require a second factor
    pub two_factor_enabled: bool,
    /// Argon2id hashes of the remaining backup codes
    #[serde(skip_serializing)]
    pub backup_code_hashes: Vec<String>,
    /// Hex SHA-256 fingerprints of approved devices/locations
    pub known_fingerprints: Vec<String>,
    /// Owning organization, if any
    pub organization_id: Option<Id>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new regular user with no second factor
    #[must_use]
    pub fn new(email: &str, name: &str, password_hash: String) -> Self {
        Self {
            id: Id::new(),
            email: normalize_email(email),
            name: name.trim().to_owned(),
            password_hash,
            role: UserRole::User,
            email_verified: false,
            two_factor_secret: None,
            two_factor_enabled: false,
            backup_code_hashes: Vec::new(),
            known_fingerprints: Vec::new(),
            organization_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set the role (builder style, used by provisioning and tests)
    #[must_use]
    pub const fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    /// Set the owning organization
    #[must_use]
    pub const fn with_organization(mut self, organization_id: Id) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Whether `fingerprint` was approved before
    #[must_use]
    pub fn knows_fingerprint(&self, fingerprint: &str) -> bool {
        self.known_fingerprints.iter().any(|known| known == fingerprint)
    }
}

/// Canonical form of a login identifier
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_REGEX
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok())
        .as_ref()
}

/// Check that an email address is plausibly deliverable
///
/// # Errors
///
/// Returns `InvalidInput` if the address has no valid shape
pub fn validate_email(email: &str) -> AppResult<()> {
    let email = email.trim();
    let valid = email_regex().map_or_else(|| email.contains('@'), |re| re.is_match(email));
    if !valid {
        return Err(AppError::invalid_input("Invalid email format"));
    }
    Ok(())
}

/// Check that a display name has enough letters and nothing else
///
/// # Errors
///
/// Returns `InvalidInput` if the name is too short or has characters other than letters and spaces
pub fn validate_name(name: &str) -> AppResult<()> {
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        return Err(AppError::invalid_input(format!(
            "Name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err(AppError::invalid_input(
            "Name may only contain letters and spaces",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("  Alice.B+tag@sub.example.org ").is_ok());
        assert!(validate_email("alice").is_err());
        assert!(validate_email("alice@example").is_err());
        assert!(validate_email("@example.com").is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Ada Lovelace").is_ok());
        assert!(validate_name("Zoë").is_ok());
        assert!(validate_name("Al").is_err());
        assert!(validate_name("R2D2 unit").is_err());
    }

    #[test]
    fn test_role_round_trip_and_elevation() {
        for role in [UserRole::User, UserRole::Admin, UserRole::SuperAdmin] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!(UserRole::SuperAdmin.is_elevated());
        assert!(!UserRole::Admin.is_elevated());
        assert!("root".parse::<UserRole>().is_err());
    }
}
