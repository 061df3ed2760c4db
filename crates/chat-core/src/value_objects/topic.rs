//! Topic - a logical broadcast channel that connections subscribe to
//!
//! Three namespaces exist:
//! - `guild:<id>` for everything scoped to a guild
//! - `channel:<id>` for DMs, group DMs, and per-channel scoping
//! - `user:<id>` for events addressed to exactly one account

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::Snowflake;

/// A subscribable topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    Guild(Snowflake),
    Channel(Snowflake),
    User(Snowflake),
}

impl Topic {
    const GUILD_PREFIX: &'static str = "guild:";
    const CHANNEL_PREFIX: &'static str = "channel:";
    const USER_PREFIX: &'static str = "user:";

    /// Wire name of the topic, e.g. `guild:123`
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Parse a topic from its wire name
    pub fn parse(s: &str) -> Result<Self, TopicParseError> {
        let (ctor, rest): (fn(Snowflake) -> Topic, &str) =
            if let Some(rest) = s.strip_prefix(Self::GUILD_PREFIX) {
                (Topic::Guild, rest)
            } else if let Some(rest) = s.strip_prefix(Self::CHANNEL_PREFIX) {
                (Topic::Channel, rest)
            } else if let Some(rest) = s.strip_prefix(Self::USER_PREFIX) {
                (Topic::User, rest)
            } else {
                return Err(TopicParseError::UnknownNamespace(s.to_string()));
            };

        Snowflake::parse(rest)
            .map(ctor)
            .map_err(|_| TopicParseError::InvalidId(s.to_string()))
    }

    /// Id carried by the topic regardless of namespace
    pub const fn id(&self) -> Snowflake {
        match self {
            Topic::Guild(id) | Topic::Channel(id) | Topic::User(id) => *id,
        }
    }

    pub const fn is_user(&self) -> bool {
        matches!(self, Topic::User(_))
    }

    pub const fn is_guild(&self) -> bool {
        matches!(self, Topic::Guild(_))
    }
}

/// Error when parsing a topic name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicParseError {
    #[error("unknown topic namespace: {0}")]
    UnknownNamespace(String),

    #[error("invalid topic id: {0}")]
    InvalidId(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Guild(id) => write!(f, "{}{}", Self::GUILD_PREFIX, id),
            Topic::Channel(id) => write!(f, "{}{}", Self::CHANNEL_PREFIX, id),
            Topic::User(id) => write!(f, "{}{}", Self::USER_PREFIX, id),
        }
    }
}

impl std::str::FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl Serialize for Topic {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Topic::parse(&raw).map_err(serde::de::Error::custom)
    }
}
