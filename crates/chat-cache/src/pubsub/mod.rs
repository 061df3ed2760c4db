//! Cross-process broadcast bus.
//!
//! Gateway processes behind a load balancer all observe the same envelope
//! stream through this bus and fan each envelope out to their own
//! connections.

mod bus;
mod envelope;
mod memory_bus;
mod redis_bus;

pub use bus::{stop_requested, BroadcastBus, BusError, BusResult, BusStats};
pub use envelope::{
    all_topics_pattern, channel_key, key_matches, topic_from_key, EventEnvelope, OriginStamp,
};
pub use memory_bus::{MemoryBus, MemoryHub};
pub use redis_bus::RedisBus;
