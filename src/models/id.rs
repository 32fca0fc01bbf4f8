// ABOUTME: Opaque Id value type used for users, organizations, and API keys
// ABOUTME: Internal form is a UUID; external form is 22-char base64url used at HTTP boundaries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::errors::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Type-safe opaque identifier
///
/// Handlers decode incoming ids once with [`Id::from_external`]; everything past
/// the boundary works with `Id` values and never parses strings again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Uuid);

impl Id {
    /// Create a new random `Id`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `Id` from a UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Encode for use outside the service (URLs, token claims, JSON bodies)
    #[must_use]
    pub fn to_external(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    /// Decode an external id; a canonical UUID string is also accepted
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the value is neither encoding
    pub fn from_external(value: &str) -> AppResult<Self> {
        let value = value.trim();
        if let Ok(bytes) = URL_SAFE_NO_PAD.decode(value) {
            if let Ok(uuid) = Uuid::from_slice(&bytes) {
                return Ok(Self(uuid));
            }
        }
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| AppError::invalid_input("Malformed identifier"))
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for Id {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<Id> for Uuid {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_external())
    }
}

impl FromStr for Id {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external(s)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_external())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_external(&raw).map_err(serde::de::Error::custom)
    }
}
