//! Op code handlers
//!
//! Handles incoming WebSocket messages based on their operation code.

mod error;
mod heartbeat;
mod identify;
mod presence;

pub use error::{HandlerError, HandlerResult};
pub use heartbeat::HeartbeatHandler;
pub use identify::IdentifyHandler;
pub use presence::PresenceHandler;

use crate::connection::{Connection, ConnectionState};
use crate::protocol::{GatewayMessage, OpCode};
use crate::server::GatewayState;
use std::sync::Arc;

/// Dispatch incoming client messages to appropriate handlers
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Handle an incoming client message. An error means the connection
    /// must be closed with the error's close code.
    pub async fn dispatch(
        state: &GatewayState,
        connection: &Arc<Connection>,
        message: GatewayMessage,
    ) -> HandlerResult<()> {
        // Validate that this is a client-sendable op code
        if !message.op.is_client_op() {
            tracing::warn!(
                session_id = %connection.session_id(),
                op = %message.op,
                "Received server-only op code from client"
            );
            return Err(HandlerError::UnknownOpcode(u64::from(message.op.as_u8())));
        }

        if message.op != OpCode::Identify && connection.state() == ConnectionState::Connecting {
            tracing::debug!(
                session_id = %connection.session_id(),
                op = %message.op,
                "Op before Identify"
            );
            return Err(HandlerError::NotAuthenticated);
        }

        match message.op {
            OpCode::Identify => {
                let payload = message.as_identify().ok_or_else(|| {
                    HandlerError::InvalidPayload("Invalid Identify payload".to_string())
                })?;

                IdentifyHandler::handle(state, connection, payload).await
            }
            OpCode::Heartbeat => {
                let payload = message.as_heartbeat().ok_or_else(|| {
                    HandlerError::InvalidPayload("Invalid Heartbeat payload".to_string())
                })?;

                HeartbeatHandler::handle(state.manager(), connection, payload)
            }
            OpCode::PresenceUpdate => {
                let payload = message.as_presence_update().ok_or_else(|| {
                    HandlerError::InvalidPayload("Invalid PresenceUpdate payload".to_string())
                })?;

                PresenceHandler::handle(state.manager().presence(), connection, payload).await
            }
            // These ops should never reach here due to is_client_op check
            other => Err(HandlerError::UnknownOpcode(u64::from(other.as_u8()))),
        }
    }
}
