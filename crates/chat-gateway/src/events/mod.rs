//! Gateway events
//!
//! Defines the dispatch event vocabulary and the payloads the gateway builds or inspects.

mod event_types;
mod payloads;

pub use event_types::GatewayEventType;
pub use payloads::{
    snowflake_field, subject_user_id, PresenceEvent, ReadyEvent, SubscriptionResyncEvent,
    SubscriptionUpdateEvent, UserPayload,
};
