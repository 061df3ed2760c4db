//! Principal - the identity bound to a connection at authentication time

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Account tier carried in the identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Free,
    Crystalline,
}

impl UserTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Crystalline => "crystalline",
        }
    }

    /// Unknown tiers degrade to `Free` rather than rejecting the token
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "crystalline" => Self::Crystalline,
            _ => Self::Free,
        }
    }
}

/// Authenticated identity. Immutable for the lifetime of a connection,
/// and may back several connections at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Snowflake,
    pub username: String,
    pub tier: UserTier,
}

impl Principal {
    pub fn new(user_id: Snowflake, username: impl Into<String>, tier: UserTier) -> Self {
        Self {
            user_id,
            username: username.into(),
            tier,
        }
    }
}

/// Why a credential was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("malformed credential")]
    Malformed,

    #[error("credential expired")]
    Expired,

    #[error("invalid credential signature")]
    InvalidSignature,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "MALFORMED",
            Self::Expired => "EXPIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
        }
    }
}
