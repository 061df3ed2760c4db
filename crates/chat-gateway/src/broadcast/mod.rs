//! Event broadcasting
//!
//! Moves envelopes from the cross-process bus to local connections.

mod dispatcher;
mod pump;

pub use dispatcher::{DispatchReport, Dispatcher};
pub use pump::{shard_for, BusPump};
