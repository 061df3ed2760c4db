//! WebSocket handler
//!
//! One reader task and one writer task per connection. The writer is the
//! only consumer of the outbound queue and stamps dispatch sequence
//! numbers as frames hit the socket. Whichever task ends first tears the
//! connection down and the other is cancelled. A close started elsewhere
//! (eviction, heartbeat timeout, shutdown) gives the writer a bounded
//! window to flush the close frame before both tasks are aborted.

use crate::connection::{Connection, ConnectionManager, ConnectionState, Frame, Next};
use crate::handlers::MessageDispatcher;
use crate::protocol::{CloseCode, GatewayMessage, HelloPayload};
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long the writer gets to flush the close frame
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket gateway handler
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(state, socket))
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket) {
    let _open = state.sockets().enter();
    let manager = Arc::clone(state.manager());
    let connection = manager.open();
    tracing::info!(session_id = %connection.session_id(), "WebSocket connection established");

    let hello = GatewayMessage::hello(HelloPayload::with_interval(
        state.config().gateway.heartbeat_interval_ms,
    ));
    if manager.push(&connection, Frame::Message(hello)).is_err() {
        manager.close(&connection, CloseCode::UnknownError);
        return;
    }

    let (ws_sink, ws_stream) = socket.split();
    let writer = tokio::spawn(write_loop(Arc::clone(&connection), ws_sink));
    let reader = tokio::spawn(read_loop(state, Arc::clone(&connection), ws_stream));

    supervise(&manager, &connection, reader, writer).await;
}

/// Wait for the socket tasks to finish and tear the connection down
async fn supervise(
    manager: &ConnectionManager,
    connection: &Arc<Connection>,
    mut reader: JoinHandle<CloseCode>,
    mut writer: JoinHandle<()>,
) {
    let session_id = connection.session_id();

    tokio::select! {
        result = &mut reader => {
            let code = result.unwrap_or(CloseCode::UnknownError);
            tracing::debug!(session_id = %session_id, close_code = code.as_u16(), "Receive task ended");
            manager.close(connection, code);
        }
        () = connection.outbound().closed() => {
            tracing::debug!(session_id = %session_id, "Connection closed by the gateway");
        }
        _ = &mut writer => {
            tracing::debug!(session_id = %session_id, "Send task ended");
            manager.close(connection, CloseCode::Normal);
            reader.abort();
            return;
        }
    }

    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        tracing::debug!(session_id = %session_id, "Close frame not flushed in time");
        writer.abort();
    }
    reader.abort();
}

/// Read frames until the client leaves or a frame forces a close
async fn read_loop(
    state: GatewayState,
    connection: Arc<Connection>,
    mut stream: SplitStream<WebSocket>,
) -> CloseCode {
    let identify_deadline = Instant::now() + state.config().gateway.identify_timeout();

    loop {
        let next = if connection.state() == ConnectionState::Connecting {
            match tokio::time::timeout_at(identify_deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::info!(
                        session_id = %connection.session_id(),
                        "No Identify within grace window"
                    );
                    return CloseCode::PolicyViolation;
                }
            }
        } else {
            stream.next().await
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Err(close_code) = handle_text_message(&state, &connection, &text).await {
                    return close_code;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(
                    session_id = %connection.session_id(),
                    "Binary messages not supported"
                );
                return CloseCode::DecodeError;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Pong is handled automatically by axum
                tracing::trace!(session_id = %connection.session_id(), "Ping/pong");
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!(session_id = %connection.session_id(), "Client closed connection");
                return CloseCode::Normal;
            }
            Some(Err(e)) => {
                tracing::warn!(
                    session_id = %connection.session_id(),
                    error = %e,
                    "WebSocket error"
                );
                return CloseCode::UnknownError;
            }
        }
    }
}

/// Drain the outbound queue into the socket, ending with a close frame
async fn write_loop(connection: Arc<Connection>, mut sink: SplitSink<WebSocket, Message>) {
    loop {
        match connection.outbound().next().await {
            Next::Frame(frame) => {
                let encoded = match &frame {
                    Frame::Message(message) => message.to_json(),
                    Frame::Event(event) => event.encode(connection.next_sequence()),
                };
                let text = match encoded {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %connection.session_id(),
                            error = %e,
                            "Failed to encode outbound frame"
                        );
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    tracing::debug!(
                        session_id = %connection.session_id(),
                        "Failed to send message to WebSocket"
                    );
                    return;
                }
            }
            Next::Close(code) => {
                let frame = CloseFrame {
                    code: code.as_u16(),
                    reason: code.description().into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                let _ = sink.close().await;
                return;
            }
        }
    }
}

/// Handle a text message from the client
async fn handle_text_message(
    state: &GatewayState,
    connection: &Arc<Connection>,
    text: &str,
) -> Result<(), CloseCode> {
    // Parse the message
    let message = match GatewayMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(
                session_id = %connection.session_id(),
                error = %e,
                "Failed to parse message"
            );
            return Err(e.close_code());
        }
    };

    tracing::trace!(
        session_id = %connection.session_id(),
        op = %message.op,
        "Received message"
    );

    // Dispatch to handler
    match MessageDispatcher::dispatch(state, connection, message).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(
                session_id = %connection.session_id(),
                error = %e,
                "Handler error"
            );
            // No code means the connection is already closing
            Err(e.to_close_code().unwrap_or(CloseCode::Normal))
        }
    }
}
