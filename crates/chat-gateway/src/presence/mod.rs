//! User presence derived from live connections

mod tracker;

pub use tracker::{resolve_status, PresenceInputs, PresenceTracker, ScheduleFetch};
