//! Value objects - immutable types that represent domain concepts

mod snowflake;
mod topic;

pub use snowflake::{Snowflake, SnowflakeParseError};
pub use topic::{Topic, TopicParseError};
