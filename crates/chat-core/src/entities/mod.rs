//! Domain entities - who is connected and how they appear to others

mod presence;
mod principal;

pub use presence::{DndSchedule, PresenceRecord, PresenceStatus};
pub use principal::{AuthFailure, Principal, UserTier};
