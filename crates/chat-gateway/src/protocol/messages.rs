//! Gateway message format
//!
//! Defines the structure for all WebSocket frames.

use super::{CloseCode, HeartbeatAckPayload, HeartbeatPayload, HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Why an inbound text frame could not be turned into a [`GatewayMessage`]
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown op code: {0}")]
    UnknownOpcode(u64),
}

impl FrameError {
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::Decode(_) => CloseCode::DecodeError,
            Self::UnknownOpcode(_) => CloseCode::UnknownOpcode,
        }
    }
}

/// Gateway message format
///
/// All frames sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Per-connection sequence number (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Envelope id for client-side dedup (only for bus-originated dispatches)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    /// Event data payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

/// Loose shape used to tell an unknown op apart from garbage
#[derive(Deserialize)]
struct RawFrame {
    op: u64,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    d: Option<Value>,
}

/// Borrowed view of a dispatch frame, so fanout can serialize shared data
/// without cloning it per connection
#[derive(Serialize)]
struct DispatchView<'a> {
    op: OpCode,
    t: &'a str,
    s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Uuid>,
    d: &'a Value,
}

impl GatewayMessage {
    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            id: None,
            d: Some(data),
        }
    }

    /// Create a Hello message (op=10)
    #[must_use]
    pub fn hello(payload: HelloPayload) -> Self {
        Self {
            op: OpCode::Hello,
            t: None,
            s: None,
            id: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Create a Heartbeat ACK message (op=11)
    #[must_use]
    pub fn heartbeat_ack(payload: HeartbeatAckPayload) -> Self {
        Self {
            op: OpCode::HeartbeatAck,
            t: None,
            s: None,
            id: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Serialize a dispatch frame straight from borrowed parts
    pub fn encode_dispatch(
        event_type: &str,
        sequence: u64,
        id: Option<&Uuid>,
        data: &Value,
    ) -> Result<String, serde_json::Error> {
        serde_json::to_string(&DispatchView {
            op: OpCode::Dispatch,
            t: event_type,
            s: sequence,
            id,
            d: data,
        })
    }

    // === Parsing Client Messages ===

    /// Try to parse as an Identify payload (op=2)
    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse as a Presence Update payload (op=3)
    pub fn as_presence_update(&self) -> Option<PresenceUpdatePayload> {
        if self.op != OpCode::PresenceUpdate {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Parse the heartbeat payload (op=1)
    pub fn as_heartbeat(&self) -> Option<HeartbeatPayload> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(HeartbeatPayload::from_data(self.d.as_ref()))
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize an inbound frame, separating unknown op codes from bad JSON
    pub fn from_json(json: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(json)?;
        let op = u8::try_from(raw.op)
            .ok()
            .and_then(|op| OpCode::try_from(op).ok())
            .ok_or(FrameError::UnknownOpcode(raw.op))?;

        Ok(Self {
            op,
            t: raw.t,
            s: raw.s,
            id: None,
            d: raw.d,
        })
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
