#![allow(clippy::module_name_repetitions)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::types::ColumnEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ColumnEnumError> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ColumnEnumError {
                column: "role",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sanitised citation persisted with an assistant message. The preview
/// is intentionally truncated; full chunk content is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub chunk_id: Uuid,
    pub document_title: String,
    pub similarity: f32,
    pub content_preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub section_hierarchy: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub sources: Option<Vec<SourceRef>>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub parent_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Message {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let sources: Option<sqlx::types::Json<Vec<SourceRef>>> = row.try_get("sources")?;
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: MessageRole::parse(&role).map_err(|_| ColumnEnumError::decode("role", &role))?,
            content: row.try_get("content")?,
            sources: sources.map(|json| json.0),
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            parent_message_id: row.try_get("parent_message_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const COLUMNS: &str = "id, conversation_id, role, content, sources, provider, model, \
     prompt_tokens, completion_tokens, parent_message_id, created_at";

/// Token usage reported by the provider for an assistant turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl Message {
    pub async fn create_user(
        pool: &PgPool,
        conversation_id: Uuid,
        content: &str,
    ) -> Result<Self, AppError> {
        let sql = format!(
            "INSERT INTO messages (id, conversation_id, role, content)
             VALUES ($1, $2, 'user', $3)
             RETURNING {COLUMNS}"
        );

        let message = sqlx::query_as::<_, Self>(&sql)
            .bind(Uuid::new_v4())
            .bind(conversation_id)
            .bind(content)
            .fetch_one(pool)
            .await?;

        Ok(message)
    }

    /// Messages are immutable once written; regeneration creates a new row
    /// pointing at its predecessor via `parent_message_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_assistant(
        pool: &PgPool,
        conversation_id: Uuid,
        content: &str,
        sources: &[SourceRef],
        provider: &str,
        model: &str,
        usage: TokenUsage,
        parent_message_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        let sql = format!(
            "INSERT INTO messages
                 (id, conversation_id, role, content, sources, provider, model,
                  prompt_tokens, completion_tokens, parent_message_id)
             VALUES ($1, $2, 'assistant', $3, $4, $5, $6, $7, $8, $9)
             RETURNING {COLUMNS}"
        );

        let message = sqlx::query_as::<_, Self>(&sql)
            .bind(Uuid::new_v4())
            .bind(conversation_id)
            .bind(content)
            .bind(sqlx::types::Json(sources))
            .bind(provider)
            .bind(model)
            .bind(usage.prompt_tokens)
            .bind(usage.completion_tokens)
            .bind(parent_message_id)
            .fetch_one(pool)
            .await?;

        Ok(message)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE id = $1");
        let message = sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(message)
    }

    /// The most recent messages of a conversation, oldest first.
    pub async fn recent_history(
        pool: &PgPool,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM (
                 SELECT {COLUMNS} FROM messages
                 WHERE conversation_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2
             ) recent ORDER BY created_at ASC"
        );

        let messages = sqlx::query_as::<_, Self>(&sql)
            .bind(conversation_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await?;

        Ok(messages)
    }

    /// Every distinct source cited by past assistant messages in the
    /// conversation, deduplicated by chunk id.
    pub async fn cited_sources(
        pool: &PgPool,
        conversation_id: Uuid,
    ) -> Result<Vec<SourceRef>, AppError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM messages
             WHERE conversation_id = $1 AND sources IS NOT NULL
             ORDER BY created_at ASC"
        );

        let messages = sqlx::query_as::<_, Self>(&sql)
            .bind(conversation_id)
            .fetch_all(pool)
            .await?;

        let mut seen = std::collections::HashSet::new();
        let mut sources = Vec::new();
        for message in messages {
            for source in message.sources.unwrap_or_default() {
                if seen.insert(source.chunk_id) {
                    sources.push(source);
                }
            }
        }

        Ok(sources)
    }

    /// The user question immediately preceding this message, if any.
    pub async fn preceding_user_message(
        pool: &PgPool,
        message: &Self,
    ) -> Result<Option<Self>, AppError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM messages
             WHERE conversation_id = $1 AND role = 'user' AND created_at < $2
             ORDER BY created_at DESC LIMIT 1"
        );

        let preceding = sqlx::query_as::<_, Self>(&sql)
            .bind(message.conversation_id)
            .bind(message.created_at)
            .fetch_optional(pool)
            .await?;

        Ok(preceding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(MessageRole::parse("system").is_err());
    }

    #[test]
    fn test_source_ref_omits_empty_optionals() {
        let source = SourceRef {
            chunk_id: Uuid::new_v4(),
            document_title: "Guide RTT".to_string(),
            similarity: 0.91,
            content_preview: "Les jours de RTT sont...".to_string(),
            page_number: None,
            section_hierarchy: Vec::new(),
        };

        let encoded = serde_json::to_value(&source).unwrap();
        assert!(encoded.get("page_number").is_none());
        assert!(encoded.get("section_hierarchy").is_none());
    }

    #[test]
    fn test_source_ref_round_trip() {
        let source = SourceRef {
            chunk_id: Uuid::new_v4(),
            document_title: "Procédure fusappel".to_string(),
            similarity: 0.73,
            content_preview: "En cas d'erreur 6102...".to_string(),
            page_number: Some(12),
            section_hierarchy: vec!["Erreurs".to_string(), "6102".to_string()],
        };

        let encoded = serde_json::to_string(&source).unwrap();
        let decoded: SourceRef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(source, decoded);
    }
}
