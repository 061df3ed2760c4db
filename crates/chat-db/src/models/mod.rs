//! Database row models

mod membership;

pub use membership::{DndScheduleModel, TopicRowModel};
