//! Topic subscriptions
//!
//! Which local connections receive which topics.

mod table;

pub use table::{SubscriptionDiff, SubscriptionTable};
