//! # chat-db
//!
//! PostgreSQL implementation of the gateway's [`MembershipStore`] port via SQLx.
//!
//! The gateway only ever reads from the relational store: which guilds and
//! DM channels a user belongs to, and their do-not-disturb schedule. The
//! tables are owned and migrated by the REST service.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_db::{create_pool, PgMembershipStore, PoolSettings};
//! use chat_core::MembershipStore;
//!
//! async fn example(config: &chat_common::DatabaseConfig) -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool(&PoolSettings::from(config)).await?;
//!     let store = PgMembershipStore::new(pool);
//!     let topics = store.user_topics(chat_core::Snowflake::new(1)).await?;
//!     Ok(())
//! }
//! ```
//!
//! [`MembershipStore`]: chat_core::MembershipStore

pub mod mappers;
pub mod models;
pub mod pool;
pub mod repositories;

// Re-export commonly used types
pub use pool::{create_pool, PgPool, PoolSettings};
pub use repositories::PgMembershipStore;
