//! Identify handler (op 2)

use super::{HandlerError, HandlerResult};
use crate::connection::{Connection, ConnectionState};
use crate::protocol::IdentifyPayload;
use crate::server::GatewayState;
use std::sync::Arc;

/// Handles Identify messages
pub struct IdentifyHandler;

impl IdentifyHandler {
    /// Verify the token, then register and install subscriptions
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: IdentifyPayload,
    ) -> HandlerResult<()> {
        if connection.state() != ConnectionState::Connecting {
            tracing::warn!(
                session_id = %connection.session_id(),
                "Client sent Identify while already authenticated"
            );
            return Err(HandlerError::AlreadyAuthenticated);
        }

        let principal = state.verifier().verify(&payload.token).map_err(|failure| {
            tracing::debug!(
                session_id = %connection.session_id(),
                reason = failure.code(),
                "Token validation failed"
            );
            HandlerError::Auth(failure)
        })?;

        if let Some(properties) = &payload.properties {
            tracing::debug!(
                session_id = %connection.session_id(),
                os = ?properties.os,
                browser = ?properties.browser,
                device = ?properties.device,
                "Client properties"
            );
        }

        let user_id = principal.user_id;
        let connection_id = state.manager().identify(connection, principal).await?;

        tracing::info!(
            session_id = %connection.session_id(),
            connection_id = %connection_id,
            user_id = %user_id,
            "Client identified"
        );

        Ok(())
    }
}
