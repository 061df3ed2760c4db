//! Presence status and do-not-disturb schedules

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Presence status of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    /// Manual choice only; announced to others as `Offline`
    Invisible,
    #[default]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "idle" => Some(Self::Idle),
            "dnd" => Some(Self::Dnd),
            "invisible" => Some(Self::Invisible),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Status as seen by other users
    pub fn public(self) -> Self {
        match self {
            Self::Invisible => Self::Offline,
            other => other,
        }
    }
}

/// Derived presence of one user, as last announced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: Snowflake,
    pub status: PresenceStatus,
    pub last_change_at: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn offline(user_id: Snowflake) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            last_change_at: Utc::now(),
        }
    }
}

/// A recurring do-not-disturb window.
///
/// Times are minutes after local midnight in `timezone`, so the window
/// follows daylight saving changes. A window with `start_minute > end_minute`
/// runs overnight. The weekday checked is the local weekday at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DndSchedule {
    pub enabled: bool,
    pub start_minute: u16,
    pub end_minute: u16,
    /// Bit 0 = Sunday ... bit 6 = Saturday
    pub days_of_week: u8,
    pub timezone: Tz,
}

impl DndSchedule {
    pub const ALL_DAYS: u8 = 0b0111_1111;

    /// Parse an IANA zone name such as `Europe/Berlin`
    pub fn parse_timezone(s: &str) -> Option<Tz> {
        s.trim().parse().ok()
    }

    /// Parse an `HH:MM` time of day into minutes after midnight
    pub fn parse_time_of_day(s: &str) -> Option<u16> {
        let (h, m) = s.trim().split_once(':')?;
        let h: u16 = h.parse().ok()?;
        let m: u16 = m.parse().ok()?;
        (h < 24 && m < 60).then_some(h * 60 + m)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }

        let local = now.with_timezone(&self.timezone);
        let day_bit = 1u8 << local.weekday().num_days_from_sunday();
        if self.days_of_week & day_bit == 0 {
            return false;
        }

        let minute = (local.hour() * 60 + local.minute()) as u16;

        if self.start_minute <= self.end_minute {
            minute >= self.start_minute && minute < self.end_minute
        } else {
            minute >= self.start_minute || minute < self.end_minute
        }
    }
}
