//! Handler error types

use crate::connection::QueueError;
use crate::protocol::{CloseCode, FrameError};
use chat_core::AuthFailure;
use thiserror::Error;

/// Handler error type
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid payload received
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Op code the client may not send
    #[error("Unknown op code: {0}")]
    UnknownOpcode(u64),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthFailure),

    /// Not authenticated
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Already authenticated
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Outbound queue could not take a critical frame
    #[error("Slow consumer")]
    SlowConsumer,

    /// The connection is already closing; nothing more to do
    #[error("Connection closed")]
    Closed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Convert to a close code (if applicable)
    pub fn to_close_code(&self) -> Option<CloseCode> {
        match self {
            Self::InvalidPayload(_) => Some(CloseCode::DecodeError),
            Self::UnknownOpcode(_) => Some(CloseCode::UnknownOpcode),
            Self::Auth(AuthFailure::Expired) => Some(CloseCode::TokenExpired),
            Self::Auth(_) => Some(CloseCode::AuthenticationFailed),
            Self::NotAuthenticated => Some(CloseCode::NotAuthenticated),
            Self::AlreadyAuthenticated => Some(CloseCode::AlreadyAuthenticated),
            Self::SlowConsumer => Some(CloseCode::SlowConsumer),
            Self::Closed => None,
            Self::Internal(_) => Some(CloseCode::UnknownError),
        }
    }
}

impl From<QueueError> for HandlerError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::SlowConsumer => Self::SlowConsumer,
            QueueError::Closed => Self::Closed,
        }
    }
}

impl From<FrameError> for HandlerError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Decode(e) => Self::InvalidPayload(e.to_string()),
            FrameError::UnknownOpcode(op) => Self::UnknownOpcode(op),
        }
    }
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;
