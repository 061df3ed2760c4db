//! Ports - the narrow interfaces the gateway consumes from its collaborators
//!
//! The domain layer defines what it needs, and the infrastructure layer
//! provides the implementation.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::entities::{AuthFailure, DndSchedule, Principal};
use crate::error::DomainError;
use crate::value_objects::{Snowflake, Topic};

/// Result type for store operations
pub type RepoResult<T> = Result<T, DomainError>;

/// Validates a bearer credential and yields the principal behind it.
/// Pure: no side effects.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Principal, AuthFailure>;
}

/// Everything fetched from the store when a connection becomes ready
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    pub topics: HashSet<Topic>,
    pub dnd_schedule: Option<DndSchedule>,
}

// ============================================================================
// Membership Store
// ============================================================================

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Guild and DM channel topics the user currently has access to.
    /// Never includes the user's own `user:` topic.
    async fn user_topics(&self, user_id: Snowflake) -> RepoResult<HashSet<Topic>>;

    /// The user's do-not-disturb schedule, if one is configured
    async fn dnd_schedule(&self, user_id: Snowflake) -> RepoResult<Option<DndSchedule>>;

    /// Topics and schedule in one call
    async fn snapshot(&self, user_id: Snowflake) -> RepoResult<MembershipSnapshot> {
        let topics = self.user_topics(user_id).await?;
        let dnd_schedule = self.dnd_schedule(user_id).await?;
        Ok(MembershipSnapshot {
            topics,
            dnd_schedule,
        })
    }
}
