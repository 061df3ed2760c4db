//! Gateway operation codes

use serde::{Deserialize, Serialize};

/// Which side of the socket may send an op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// The `op` field of every gateway frame.
///
/// Numbering follows the common gateway convention so existing client
/// libraries need no remapping; 4-9 are unassigned here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OpCode {
    /// An event fanned out from the bus, with `t`, `s` and `id`
    Dispatch = 0,
    /// Keepalive, answered by `HeartbeatAck`
    Heartbeat = 1,
    /// Bearer token; must be the first client frame
    Identify = 2,
    /// Manual status or idle report
    PresenceUpdate = 3,
    /// First frame on every socket, carries the heartbeat interval
    Hello = 10,
    HeartbeatAck = 11,
}

impl OpCode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn direction(self) -> Direction {
        match self {
            Self::Heartbeat | Self::Identify | Self::PresenceUpdate => Direction::ClientToServer,
            Self::Dispatch | Self::Hello | Self::HeartbeatAck => Direction::ServerToClient,
        }
    }

    /// Whether a client is allowed to send this op
    pub const fn is_client_op(self) -> bool {
        matches!(self.direction(), Direction::ClientToServer)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "DISPATCH",
            Self::Heartbeat => "HEARTBEAT",
            Self::Identify => "IDENTIFY",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::Hello => "HELLO",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            other => return Err(format!("invalid op code: {other}")),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.as_u8()
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.as_u8(), self.name())
    }
}
