//! Presence Update handler (op 3)

use super::{HandlerError, HandlerResult};
use crate::connection::{Connection, ConnectionState};
use crate::presence::PresenceTracker;
use crate::protocol::PresenceUpdatePayload;
use std::sync::Arc;

/// Handles Presence Update messages
pub struct PresenceHandler;

impl PresenceHandler {
    /// Apply the requested status; the tracker announces it if the public
    /// status changes
    pub async fn handle(
        presence: &PresenceTracker,
        connection: &Arc<Connection>,
        payload: PresenceUpdatePayload,
    ) -> HandlerResult<()> {
        let user_id = match (connection.state(), connection.user_id()) {
            (ConnectionState::Ready, Some(user_id)) => user_id,
            _ => {
                tracing::warn!(
                    session_id = %connection.session_id(),
                    "Presence update before READY"
                );
                return Err(HandlerError::NotAuthenticated);
            }
        };

        let Some(status) = payload.requested_status() else {
            tracing::debug!(
                session_id = %connection.session_id(),
                status = %payload.status,
                "Invalid presence status"
            );
            return Err(HandlerError::InvalidPayload(format!(
                "Invalid status: {}. Must be one of: {}",
                payload.status,
                PresenceUpdatePayload::VALID_STATUSES.join(", ")
            )));
        };

        presence.set_status(user_id, status).await;

        tracing::debug!(
            session_id = %connection.session_id(),
            user_id = %user_id,
            status = %payload.status,
            "Presence update requested"
        );
        Ok(())
    }
}
