use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub provider: String,
    pub use_tools: bool,
    /// `None` defers to the global `RERANKER_ENABLED` default.
    pub reranking_enabled: Option<bool>,
    pub universe_id: Option<Uuid>,
    pub archived: bool,
    pub message_count: i32,
    pub current_topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, user_id, title, provider, use_tools, reranking_enabled, \
     universe_id, archived, message_count, current_topic, created_at, updated_at";

impl Conversation {
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        title: &str,
        provider: &str,
        use_tools: bool,
        universe_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        let id = Uuid::new_v4();
        let sql = format!(
            "INSERT INTO conversations (id, user_id, title, provider, use_tools, universe_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );

        let conversation = sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(title)
            .bind(provider)
            .bind(use_tools)
            .bind(universe_id)
            .fetch_one(pool)
            .await?;

        Ok(conversation)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let sql = format!("SELECT {COLUMNS} FROM conversations WHERE id = $1");
        let conversation = sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(conversation)
    }

    /// Loads a conversation and verifies the requesting user owns it.
    pub async fn get_owned(pool: &PgPool, id: Uuid, user_id: Uuid) -> Result<Self, AppError> {
        let conversation = Self::get(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this conversation".to_string(),
            ));
        }

        Ok(conversation)
    }

    /// Caches the extracted topic until a shift is detected.
    pub async fn set_topic(pool: &PgPool, id: Uuid, topic: Option<&str>) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET current_topic = $1, updated_at = now() WHERE id = $2")
            .bind(topic)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn patch_title(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
        new_title: &str,
    ) -> Result<(), AppError> {
        let conversation = Self::get_owned(pool, id, user_id).await?;

        sqlx::query("UPDATE conversations SET title = $1, updated_at = now() WHERE id = $2")
            .bind(new_title)
            .bind(conversation.id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn set_archived(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
        archived: bool,
    ) -> Result<(), AppError> {
        let conversation = Self::get_owned(pool, id, user_id).await?;

        sqlx::query("UPDATE conversations SET archived = $1, updated_at = now() WHERE id = $2")
            .bind(archived)
            .bind(conversation.id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Effective reranking preference for this conversation.
    pub fn reranking_preference(&self, global_default: bool) -> bool {
        self.reranking_enabled.unwrap_or(global_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(reranking_enabled: Option<bool>) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Congés et RTT".to_string(),
            provider: "mistral".to_string(),
            use_tools: true,
            reranking_enabled,
            universe_id: None,
            archived: false,
            message_count: 0,
            current_topic: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_reranking_preference_defers_to_global_default() {
        assert!(conversation(None).reranking_preference(true));
        assert!(!conversation(None).reranking_preference(false));
    }

    #[test]
    fn test_reranking_preference_override_wins() {
        assert!(conversation(Some(true)).reranking_preference(false));
        assert!(!conversation(Some(false)).reranking_preference(true));
    }
}
