//! Connection management
//!
//! Per-connection state, the bounded outbound queue, the process registry,
//! and the manager that drives each connection through its lifecycle.

mod connection;
mod manager;
mod outbound;
mod registry;

pub use connection::{Connection, ConnectionState};
pub use manager::{ConnectionManager, GatewayStats};
pub use outbound::{Enqueued, EventFrame, Frame, Next, OutboundQueue, QueueError};
pub use registry::{ConnectionId, ConnectionRegistry, Unregistered};
