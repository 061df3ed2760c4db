//! Gateway protocol definitions
//!
//! Defines the WebSocket protocol including op codes, frame formats, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use messages::{FrameError, GatewayMessage};
pub use opcodes::{Direction, OpCode};
pub use payloads::{
    HeartbeatAckPayload, HeartbeatPayload, HelloPayload, IdentifyPayload, IdentifyProperties,
    PresenceUpdatePayload,
};
