//! Integration test utilities for the gateway
//!
//! Spawns in-process gateways on ephemeral ports, wired to an in-memory
//! bus and a static membership store, and drives them over real
//! WebSocket connections.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
