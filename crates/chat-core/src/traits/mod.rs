mod ports;

pub use ports::{IdentityVerifier, MembershipSnapshot, MembershipStore, RepoResult};
