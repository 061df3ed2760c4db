//! Membership rows <-> domain types

use chat_core::{DndSchedule, DomainError, Snowflake, Topic};

use crate::models::{DndScheduleModel, TopicRowModel};

/// Convert a snapshot row to a topic. Unknown kinds are skipped.
pub fn topic_from_row(row: &TopicRowModel) -> Option<Topic> {
    let id = Snowflake::new(row.id);
    match row.kind.as_str() {
        "guild" => Some(Topic::Guild(id)),
        "channel" => Some(Topic::Channel(id)),
        _ => None,
    }
}

impl TryFrom<DndScheduleModel> for DndSchedule {
    type Error = DomainError;

    fn try_from(model: DndScheduleModel) -> Result<Self, Self::Error> {
        let invalid = |field: &str, value: &str| {
            DomainError::InvalidRecord {
                what: "dnd schedule",
                user_id: Snowflake::new(model.user_id),
                detail: format!("bad {field} {value:?}"),
            }
        };

        let start_minute = DndSchedule::parse_time_of_day(&model.start_time)
            .ok_or_else(|| invalid("start_time", &model.start_time))?;
        let end_minute = DndSchedule::parse_time_of_day(&model.end_time)
            .ok_or_else(|| invalid("end_time", &model.end_time))?;
        let days_of_week = u8::try_from(model.days_of_week & 0x7F)
            .map_err(|_| invalid("days_of_week", &model.days_of_week.to_string()))?;
        let timezone = DndSchedule::parse_timezone(&model.timezone)
            .ok_or_else(|| invalid("timezone", &model.timezone))?;

        Ok(DndSchedule {
            enabled: model.enabled,
            start_minute,
            end_minute,
            days_of_week,
            timezone,
        })
    }
}
