//! Store implementations

mod error;
mod membership;

pub use membership::PgMembershipStore;
