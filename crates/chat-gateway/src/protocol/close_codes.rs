//! WebSocket close codes
//!
//! Every server-initiated close carries one of these so the client knows
//! whether to reconnect and whether it must refetch state over REST.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    /// No Identify within the grace window
    PolicyViolation = 1008,
    UnknownError = 4000,
    UnknownOpcode = 4001,
    /// Frame was not valid JSON or not a text frame
    DecodeError = 4002,
    /// Payload sent before Identify
    NotAuthenticated = 4003,
    /// Malformed token or bad signature
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    /// Refresh the token and reconnect
    TokenExpired = 4006,
    HeartbeatTimeout = 4009,
    /// Outbound queue could not keep up
    SlowConsumer = 4010,
    ServerShutdown = 4011,
}

impl CloseCode {
    const ALL: [Self; 12] = [
        Self::Normal,
        Self::PolicyViolation,
        Self::UnknownError,
        Self::UnknownOpcode,
        Self::DecodeError,
        Self::NotAuthenticated,
        Self::AuthenticationFailed,
        Self::AlreadyAuthenticated,
        Self::TokenExpired,
        Self::HeartbeatTimeout,
        Self::SlowConsumer,
        Self::ServerShutdown,
    ];

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Auth failures are final until the user signs in again
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        !matches!(self, Self::NotAuthenticated | Self::AuthenticationFailed)
    }

    /// Events may have been missed; the client must refetch its baseline over REST
    #[must_use]
    pub const fn requires_refetch(self) -> bool {
        matches!(
            self,
            Self::HeartbeatTimeout | Self::SlowConsumer | Self::ServerShutdown
        )
    }

    /// Reason text sent in the close frame
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::PolicyViolation => "Identify not received in time",
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::TokenExpired => "Token expired",
            Self::HeartbeatTimeout => "Heartbeat timeout",
            Self::SlowConsumer => "Slow consumer",
            Self::ServerShutdown => "Server shutting down",
        }
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_u16() == value)
            .ok_or_else(|| format!("unassigned close code: {value}"))
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.description())
    }
}
