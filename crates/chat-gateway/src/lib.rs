//! # chat-gateway
//!
//! WebSocket gateway for real-time bidirectional communication.
//!
//! Clients identify once per socket, are subscribed to the guilds and DM
//! channels they belong to, and receive every event published on those
//! topics by any process sharing the broadcast bus. Presence is tracked
//! across processes and announced to the user's peers.

pub mod broadcast;
pub mod connection;
pub mod events;
pub mod handlers;
pub mod heartbeat;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod subscriptions;

#[cfg(test)]
mod test_support;

pub use server::{create_app, run, Gateway, GatewayDeps, GatewayState};
