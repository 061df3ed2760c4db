//! Error handling utilities for store queries

use chat_core::DomainError;
use sqlx::Error as SqlxError;

/// Convert SQLx error to DomainError
pub fn map_db_error(e: SqlxError) -> DomainError {
    match e {
        SqlxError::PoolTimedOut => DomainError::StoreUnavailable("connection pool timed out".into()),
        other => DomainError::StoreUnavailable(other.to_string()),
    }
}
