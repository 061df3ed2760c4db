//! # chat-core
//!
//! Domain vocabulary shared by every gateway crate: identifiers, topics,
//! principals, presence, and the ports the gateway consumes from the
//! identity and storage collaborators.
//! This crate has zero dependencies on infrastructure (database, web framework, etc.).

pub mod entities;
pub mod error;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    AuthFailure, DndSchedule, PresenceRecord, PresenceStatus, Principal, UserTier,
};
pub use error::DomainError;
pub use traits::{IdentityVerifier, MembershipSnapshot, MembershipStore, RepoResult};
pub use value_objects::{Snowflake, SnowflakeParseError, Topic, TopicParseError};

/// Zone type carried by [`DndSchedule`]
pub use chrono_tz::Tz;
