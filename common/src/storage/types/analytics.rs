use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Read model for dashboards. Backed by materialised views; refreshed by
/// the quality scheduler, so numbers may lag live data by up to a day.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationStats {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub message_count: i32,
    pub assistant_message_count: i64,
    pub thumbs_up_count: i64,
    pub thumbs_down_count: i64,
    pub documents_cited: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationStats {
    pub async fn for_conversation(
        pool: &PgPool,
        conversation_id: Uuid,
    ) -> Result<Option<Self>, AppError> {
        let stats = sqlx::query_as::<_, Self>(
            "SELECT conversation_id, user_id, message_count, assistant_message_count,
                    thumbs_up_count, thumbs_down_count, documents_cited, last_message_at
             FROM conversation_stats WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;
        Ok(stats)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyUsage {
    pub day: DateTime<Utc>,
    pub message_count: i64,
    pub user_message_count: i64,
    pub rating_count: i64,
    pub thumbs_down_count: i64,
}

impl DailyUsage {
    pub async fn last_days(pool: &PgPool, days: i32) -> Result<Vec<Self>, AppError> {
        let usage = sqlx::query_as::<_, Self>(
            "SELECT day, message_count, user_message_count, rating_count, thumbs_down_count
             FROM daily_usage
             WHERE day >= now() - make_interval(days => $1)
             ORDER BY day DESC",
        )
        .bind(days)
        .fetch_all(pool)
        .await?;
        Ok(usage)
    }
}

/// Concurrent refresh keeps the dashboards readable during the nightly
/// maintenance run.
pub async fn refresh_views(pool: &PgPool) -> Result<(), AppError> {
    sqlx::raw_sql("REFRESH MATERIALIZED VIEW CONCURRENTLY conversation_stats")
        .execute(pool)
        .await?;
    sqlx::raw_sql("REFRESH MATERIALIZED VIEW CONCURRENTLY daily_usage")
        .execute(pool)
        .await?;
    Ok(())
}
