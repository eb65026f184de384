use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::types::conversation::Conversation;
use crate::storage::types::message::{Message, MessageRole};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRating {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    /// -1 (thumbs down) or +1 (thumbs up).
    pub rating: i16,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, message_id, user_id, rating, feedback, created_at, updated_at";

impl MessageRating {
    /// One rating per message: a second submission updates in place. Only
    /// assistant messages in the caller's own conversation are ratable. The
    /// thumbs-down NOTIFY fires from a database trigger so the analyser
    /// never blocks this call.
    pub async fn upsert(
        pool: &PgPool,
        message_id: Uuid,
        user_id: Uuid,
        rating: i16,
        feedback: Option<&str>,
    ) -> Result<Self, AppError> {
        if rating != -1 && rating != 1 {
            return Err(AppError::Validation(format!(
                "rating must be -1 or 1, got {rating}"
            )));
        }

        let message = Message::get(pool, message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {message_id} not found")))?;
        if message.role != MessageRole::Assistant {
            return Err(AppError::Validation(
                "only assistant messages can be rated".to_string(),
            ));
        }

        // Ratings drive corpus maintenance, so only the conversation's
        // owner may submit one.
        Conversation::get_owned(pool, message.conversation_id, user_id).await?;

        let sql = format!(
            "INSERT INTO message_ratings (id, message_id, user_id, rating, feedback)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (message_id) DO UPDATE
                 SET rating = EXCLUDED.rating,
                     feedback = EXCLUDED.feedback,
                     updated_at = now()
             RETURNING {COLUMNS}"
        );

        let stored = sqlx::query_as::<_, Self>(&sql)
            .bind(Uuid::new_v4())
            .bind(message_id)
            .bind(user_id)
            .bind(rating)
            .bind(feedback)
            .fetch_one(pool)
            .await?;

        Ok(stored)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let sql = format!("SELECT {COLUMNS} FROM message_ratings WHERE id = $1");
        let rating = sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(rating)
    }

    /// Negative ratings that never got a classification row, oldest first.
    /// Feeds the analyser's periodic sweep.
    pub async fn unvalidated_thumbs_down(
        pool: &PgPool,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM message_ratings r
             WHERE r.rating = -1
               AND NOT EXISTS (
                   SELECT 1 FROM thumbs_down_validations v WHERE v.rating_id = r.id
               )
             ORDER BY r.created_at ASC
             LIMIT $1"
        );

        let ratings = sqlx::query_as::<_, Self>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await?;

        Ok(ratings)
    }
}
