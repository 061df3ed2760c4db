//! Failures reported by the collaborators behind the ports

use thiserror::Error;

use crate::value_objects::Snowflake;

#[derive(Debug, Error)]
pub enum DomainError {
    /// The membership store could not be reached or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored row could not be turned into a domain value
    #[error("Invalid {what} for user {user_id}: {detail}")]
    InvalidRecord {
        what: &'static str,
        user_id: Snowflake,
        detail: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Error code for logs and stats
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::InvalidRecord { .. } => "INVALID_RECORD",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// A later retry of the same read may succeed; a bad row will not fix itself
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
