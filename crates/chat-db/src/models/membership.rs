//! Rows read by the membership store

use sqlx::FromRow;

/// One row of the user's topic snapshot: `kind` is `guild` or `channel`
#[derive(Debug, Clone, FromRow)]
pub struct TopicRowModel {
    pub kind: String,
    pub id: i64,
}

/// Database model for user_dnd_schedule table
#[derive(Debug, Clone, FromRow)]
pub struct DndScheduleModel {
    pub user_id: i64,
    pub enabled: bool,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub days_of_week: i32,
    /// IANA zone name, e.g. `Europe/Berlin`
    pub timezone: String,
}
