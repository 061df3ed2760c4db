//! PostgreSQL implementation of MembershipStore

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{instrument, warn};

use chat_core::{DndSchedule, MembershipStore, RepoResult, Snowflake, Topic};

use crate::mappers::topic_from_row;
use crate::models::{DndScheduleModel, TopicRowModel};

use super::error::map_db_error;

/// PostgreSQL implementation of MembershipStore
#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    #[instrument(skip(self))]
    async fn user_topics(&self, user_id: Snowflake) -> RepoResult<HashSet<Topic>> {
        let rows = sqlx::query_as::<_, TopicRowModel>(
            r#"
            SELECT 'guild' AS kind, guild_id AS id
            FROM guild_members
            WHERE user_id = $1
            UNION ALL
            SELECT 'channel' AS kind, channel_id AS id
            FROM dm_recipients
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(rows.iter().filter_map(topic_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn dnd_schedule(&self, user_id: Snowflake) -> RepoResult<Option<DndSchedule>> {
        let row = sqlx::query_as::<_, DndScheduleModel>(
            r#"
            SELECT user_id, enabled, start_time, end_time, days_of_week, timezone
            FROM user_dnd_schedule
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        // A corrupt schedule must not block identify; treat it as absent
        Ok(row.and_then(|model| match DndSchedule::try_from(model) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed DND schedule");
                None
            }
        }))
    }
}
