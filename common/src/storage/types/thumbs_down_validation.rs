use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::types::ColumnEnumError;

/// AI-assigned cause of a negative rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbsDownClassification {
    BadAnswer,
    BadQuestion,
    MissingSources,
    Ambiguous,
}

impl ThumbsDownClassification {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadAnswer => "bad_answer",
            Self::BadQuestion => "bad_question",
            Self::MissingSources => "missing_sources",
            Self::Ambiguous => "ambiguous",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ColumnEnumError> {
        match value {
            "bad_answer" => Ok(Self::BadAnswer),
            "bad_question" => Ok(Self::BadQuestion),
            "missing_sources" => Ok(Self::MissingSources),
            "ambiguous" => Ok(Self::Ambiguous),
            other => Err(ColumnEnumError {
                column: "ai_classification",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for ThumbsDownClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ThumbsDownValidation {
    pub id: Uuid,
    pub rating_id: Uuid,
    pub ai_classification: ThumbsDownClassification,
    pub confidence: f32,
    pub rationale: String,
    pub needs_admin_review: bool,
    pub admin_decision: Option<String>,
    pub admin_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for ThumbsDownValidation {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let classification: String = row.try_get("ai_classification")?;
        Ok(Self {
            id: row.try_get("id")?,
            rating_id: row.try_get("rating_id")?,
            ai_classification: ThumbsDownClassification::parse(&classification)
                .map_err(|_| ColumnEnumError::decode("ai_classification", &classification))?,
            confidence: row.try_get("confidence")?,
            rationale: row.try_get("rationale")?,
            needs_admin_review: row.try_get("needs_admin_review")?,
            admin_decision: row.try_get("admin_decision")?,
            admin_reason: row.try_get("admin_reason")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const COLUMNS: &str = "id, rating_id, ai_classification, confidence, rationale, \
     needs_admin_review, admin_decision, admin_reason, created_at";

impl ThumbsDownValidation {
    /// Classification writes are at-least-once: keyed by `rating_id`, a
    /// replayed notification leaves the first row untouched. Returns the row
    /// that ended up stored.
    pub async fn insert_idempotent(
        pool: &PgPool,
        rating_id: Uuid,
        classification: ThumbsDownClassification,
        confidence: f32,
        rationale: &str,
        needs_admin_review: bool,
    ) -> Result<Self, AppError> {
        sqlx::query(
            "INSERT INTO thumbs_down_validations
                 (id, rating_id, ai_classification, confidence, rationale, needs_admin_review)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (rating_id) DO NOTHING",
        )
            .bind(Uuid::new_v4())
            .bind(rating_id)
            .bind(classification.as_str())
            .bind(confidence.clamp(0.0, 1.0))
            .bind(rationale)
            .bind(needs_admin_review)
            .execute(pool)
            .await?;

        let stored = Self::get_by_rating(pool, rating_id).await?.ok_or_else(|| {
            AppError::Integrity(format!("validation for rating {rating_id} vanished"))
        })?;

        Ok(stored)
    }

    pub async fn get_by_rating(pool: &PgPool, rating_id: Uuid) -> Result<Option<Self>, AppError> {
        let sql = format!("SELECT {COLUMNS} FROM thumbs_down_validations WHERE rating_id = $1");
        let validation = sqlx::query_as::<_, Self>(&sql)
            .bind(rating_id)
            .fetch_optional(pool)
            .await?;
        Ok(validation)
    }

    /// Admin overrides record a decision without rewriting the AI verdict.
    pub async fn set_admin_decision(
        pool: &PgPool,
        id: Uuid,
        decision: &str,
        reason: Option<&str>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE thumbs_down_validations
             SET admin_decision = $1, admin_reason = $2, needs_admin_review = FALSE
             WHERE id = $3",
        )
        .bind(decision)
        .bind(reason)
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("validation {id} not found")));
        }
        Ok(())
    }

    /// Documents cited at least `threshold` times across confident
    /// missing-sources validations in the rating window.
    pub async fn documents_with_missing_sources(
        pool: &PgPool,
        threshold: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let documents: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT c.document_id
             FROM thumbs_down_validations v
             JOIN message_ratings r ON r.id = v.rating_id
             JOIN messages m ON m.id = r.message_id,
                  jsonb_array_elements(m.sources) source
             JOIN chunks c ON c.id = (source ->> 'chunk_id')::uuid
             WHERE v.ai_classification = 'missing_sources'
               AND NOT v.needs_admin_review
               AND v.created_at >= $1
             GROUP BY c.document_id
             HAVING COUNT(DISTINCT v.id) >= $2",
        )
        .bind(since)
        .bind(threshold)
        .fetch_all(pool)
        .await?;

        Ok(documents.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_round_trip() {
        for classification in [
            ThumbsDownClassification::BadAnswer,
            ThumbsDownClassification::BadQuestion,
            ThumbsDownClassification::MissingSources,
            ThumbsDownClassification::Ambiguous,
        ] {
            assert_eq!(
                ThumbsDownClassification::parse(classification.as_str()).unwrap(),
                classification
            );
        }
    }

    #[test]
    fn test_classification_rejects_unknown() {
        assert!(ThumbsDownClassification::parse("hallucination").is_err());
    }

    #[test]
    fn test_classification_serde_matches_db_encoding() {
        let encoded = serde_json::to_string(&ThumbsDownClassification::MissingSources).unwrap();
        assert_eq!(encoded, "\"missing_sources\"");
    }
}
