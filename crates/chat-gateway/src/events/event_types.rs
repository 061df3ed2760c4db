//! Event names the gateway itself reacts to
//!
//! Envelopes carry their type as a plain string and anything not listed here
//! is fanned out unchanged. A variant exists only when the gateway treats the
//! event specially: it emits it, it changes subscriptions because of it, or it
//! may drop it under backpressure.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayEventType {
    /// Answer to a successful Identify
    Ready,

    GuildCreate,
    GuildDelete,
    GuildMemberAdd,
    GuildMemberRemove,
    GuildBanAdd,
    ChannelDelete,

    PresenceUpdate,
    TypingStart,

    /// Targeted subscribe/unsubscribe for one user's connections
    SubscriptionUpdate,
    /// Refetch one user's membership snapshot
    SubscriptionResync,
}

impl GatewayEventType {
    const ALL: [Self; 11] = [
        Self::Ready,
        Self::GuildCreate,
        Self::GuildDelete,
        Self::GuildMemberAdd,
        Self::GuildMemberRemove,
        Self::GuildBanAdd,
        Self::ChannelDelete,
        Self::PresenceUpdate,
        Self::TypingStart,
        Self::SubscriptionUpdate,
        Self::SubscriptionResync,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::GuildBanAdd => "GUILD_BAN_ADD",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::SubscriptionUpdate => "SUBSCRIPTION_UPDATE",
            Self::SubscriptionResync => "SUBSCRIPTION_RESYNC",
        }
    }

    /// Look up a wire name; `None` for events the gateway only relays
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    /// Consumed by gateways, never written to a socket
    #[must_use]
    pub const fn is_internal(self) -> bool {
        matches!(self, Self::SubscriptionUpdate | Self::SubscriptionResync)
    }

    /// Frames a backlogged connection may lose without breaking its state
    #[must_use]
    pub const fn is_droppable(self) -> bool {
        matches!(self, Self::TypingStart | Self::PresenceUpdate)
    }
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
