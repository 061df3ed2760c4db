//! Row model -> domain mappers

mod membership;

pub use membership::topic_from_row;
