//! Heartbeat handler (op 1)

use super::HandlerResult;
use crate::connection::{Connection, ConnectionManager, Frame};
use crate::protocol::{GatewayMessage, HeartbeatAckPayload, HeartbeatPayload};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Handles heartbeat messages
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    /// Refresh liveness and answer with an ACK echoing the client timestamp
    pub fn handle(
        manager: &ConnectionManager,
        connection: &Arc<Connection>,
        payload: HeartbeatPayload,
    ) -> HandlerResult<()> {
        connection.record_heartbeat();

        tracing::trace!(
            session_id = %connection.session_id(),
            client_timestamp = ?payload.timestamp,
            server_seq = connection.current_sequence(),
            "Heartbeat received"
        );

        let timestamp = payload
            .timestamp
            .unwrap_or_else(|| Value::from(Utc::now().timestamp_millis()));
        manager.push(
            connection,
            Frame::Message(GatewayMessage::heartbeat_ack(HeartbeatAckPayload { timestamp })),
        )?;

        Ok(())
    }
}
