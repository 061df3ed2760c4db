//! Snowflake ID - 64-bit identifier shared with the REST services
//!
//! The gateway never mints ids; it only parses, compares, and re-serializes
//! the ids carried in tokens, topics, and event payloads. On the wire ids are
//! strings (JavaScript cannot hold 64-bit integers), but publishers are
//! allowed to send plain numbers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "WireId")]
pub struct Snowflake(i64);

/// Either JSON form an id can arrive in
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid snowflake: {0:?}")]
pub struct SnowflakeParseError(String);

impl Snowflake {
    #[inline]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn into_inner(self) -> i64 {
        self.0
    }

    /// Zero stands for "not provided" in payloads
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn parse(s: &str) -> Result<Self, SnowflakeParseError> {
        s.parse()
    }

    /// Read an id out of a JSON value that may be a string or a number
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_i64().map(Self),
            _ => None,
        }
    }
}

impl FromStr for Snowflake {
    type Err = SnowflakeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| SnowflakeParseError(s.to_string()))
    }
}

impl TryFrom<WireId> for Snowflake {
    type Error = SnowflakeParseError;

    fn try_from(wire: WireId) -> Result<Self, Self::Error> {
        match wire {
            WireId::Number(id) => Ok(Self(id)),
            WireId::Text(text) => text.parse(),
        }
    }
}

impl From<Snowflake> for String {
    fn from(id: Snowflake) -> Self {
        id.0.to_string()
    }
}

impl From<i64> for Snowflake {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
