use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;

/// Ingestion parameters and corpus facts recorded alongside a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub word_count: usize,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub chunk_policy: String,
    #[serde(default)]
    pub hierarchical: bool,
}

fn default_language() -> String {
    "fr".to_string()
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub source: String,
    pub content: String,
    pub universe_id: Option<Uuid>,
    pub metadata: sqlx::types::Json<DocumentMetadata>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Inserts the document inside the caller's transaction so a failed
    /// ingestion leaves nothing behind.
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        title: &str,
        source: &str,
        content: &str,
        universe_id: Option<Uuid>,
        metadata: &DocumentMetadata,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO documents (id, title, source, content, universe_id, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(title)
        .bind(source)
        .bind(content)
        .bind(universe_id)
        .bind(sqlx::types::Json(metadata))
        .execute(&mut **tx)
        .await?;

        Ok(id)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let document = sqlx::query_as::<_, Self>(
            "SELECT id, title, source, content, universe_id, metadata, created_at
             FROM documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(document)
    }

    /// Chunks cascade with the document.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("document {id} not found")));
        }
        Ok(())
    }

    pub async fn titles_by_ids(
        pool: &PgPool,
        ids: &[Uuid],
    ) -> Result<Vec<(Uuid, String)>, AppError> {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, title FROM documents WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(pool)
                .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults_to_french() {
        let metadata: DocumentMetadata = serde_json::from_str("{\"word_count\": 42}").unwrap();
        assert_eq!(metadata.language, "fr");
        assert_eq!(metadata.word_count, 42);
        assert!(!metadata.hierarchical);
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = DocumentMetadata {
            word_count: 1200,
            language: "fr".to_string(),
            chunk_policy: "small".to_string(),
            hierarchical: true,
        };
        let encoded = serde_json::to_string(&metadata).unwrap();
        let decoded: DocumentMetadata = serde_json::from_str(&encoded).unwrap();
        assert_eq!(metadata, decoded);
    }
}
