use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentQualityScore {
    pub document_id: Uuid,
    pub needs_reingestion: bool,
    pub analysis_notes: String,
    pub last_analysed_at: DateTime<Utc>,
}

impl DocumentQualityScore {
    pub async fn mark_needs_reingestion(
        pool: &PgPool,
        document_id: Uuid,
        notes: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO document_quality_scores
                 (document_id, needs_reingestion, analysis_notes, last_analysed_at)
             VALUES ($1, TRUE, $2, now())
             ON CONFLICT (document_id) DO UPDATE
                 SET needs_reingestion = TRUE,
                     analysis_notes = EXCLUDED.analysis_notes,
                     last_analysed_at = now()",
        )
        .bind(document_id)
        .bind(notes)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(pool: &PgPool, document_id: Uuid) -> Result<Option<Self>, AppError> {
        let score = sqlx::query_as::<_, Self>(
            "SELECT document_id, needs_reingestion, analysis_notes, last_analysed_at
             FROM document_quality_scores WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(pool)
        .await?;
        Ok(score)
    }

    /// Admin override: the recommendation is dropped but the audit trail
    /// keeps the history.
    pub async fn clear_recommendation(pool: &PgPool, document_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE document_quality_scores
             SET needs_reingestion = FALSE, last_analysed_at = now()
             WHERE document_id = $1",
        )
        .bind(document_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Satisfaction computed over the rating window:
/// (positive - negative) / total.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChunkQualityScore {
    pub chunk_id: Uuid,
    pub satisfaction_score: f32,
    pub rating_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl ChunkQualityScore {
    pub async fn upsert(
        pool: &PgPool,
        chunk_id: Uuid,
        satisfaction_score: f32,
        rating_count: i32,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO chunk_quality_scores
                 (chunk_id, satisfaction_score, rating_count, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (chunk_id) DO UPDATE
                 SET satisfaction_score = EXCLUDED.satisfaction_score,
                     rating_count = EXCLUDED.rating_count,
                     updated_at = now()",
        )
        .bind(chunk_id)
        .bind(satisfaction_score)
        .bind(rating_count)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Chunk-level aggregates computed from ratings on messages whose
    /// sources cite the chunk. One row per cited chunk in the window.
    pub async fn aggregate_window(
        pool: &PgPool,
        since: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, f32, i32)>, AppError> {
        let rows: Vec<(Uuid, f32, i32)> = sqlx::query_as(
            "SELECT
                 (source ->> 'chunk_id')::uuid AS chunk_id,
                 (SUM(CASE WHEN r.rating > 0 THEN 1 ELSE -1 END)::float4
                     / COUNT(*)::float4) AS satisfaction,
                 COUNT(*)::int4 AS rating_count
             FROM message_ratings r
             JOIN messages m ON m.id = r.message_id,
                  jsonb_array_elements(m.sources) source
             WHERE m.sources IS NOT NULL
               AND r.updated_at >= $1
             GROUP BY (source ->> 'chunk_id')::uuid",
        )
        .bind(since)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistSource {
    Ai,
    Admin,
}

impl BlacklistSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Admin => "admin",
        }
    }
}

pub struct ChunkBlacklist;

impl ChunkBlacklist {
    pub async fn add(
        pool: &PgPool,
        chunk_id: Uuid,
        reason: &str,
        source: BlacklistSource,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO chunk_blacklist (chunk_id, reason, source)
             VALUES ($1, $2, $3)
             ON CONFLICT (chunk_id) DO NOTHING",
        )
        .bind(chunk_id)
        .bind(reason)
        .bind(source.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn remove(pool: &PgPool, chunk_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM chunk_blacklist WHERE chunk_id = $1")
            .bind(chunk_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Ids excluded from retrieval. Past message sources are left untouched;
    /// the blacklist only shapes future searches.
    pub async fn all_ids(pool: &PgPool) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT chunk_id FROM chunk_blacklist")
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn contains(pool: &PgPool, chunk_id: Uuid) -> Result<bool, AppError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT chunk_id FROM chunk_blacklist WHERE chunk_id = $1")
                .bind(chunk_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditActor {
    Ai,
    Admin,
    Scheduler,
}

impl AuditActor {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Admin => "admin",
            Self::Scheduler => "scheduler",
        }
    }
}

pub struct QualityAuditLog;

impl QualityAuditLog {
    /// Every quality decision lands here; overrides append rather than
    /// rewind.
    pub async fn record(
        pool: &PgPool,
        entity_kind: &str,
        entity_id: Uuid,
        action: &str,
        detail: serde_json::Value,
        actor: AuditActor,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO quality_audit_log (id, entity_kind, entity_id, action, detail, actor)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(entity_kind)
        .bind(entity_id)
        .bind(action)
        .bind(detail)
        .bind(actor.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Pedagogical notifications queued for users after a `bad_question`
/// classification, when auto-notifications are enabled.
pub struct UserNotification;

impl UserNotification {
    pub async fn enqueue(
        pool: &PgPool,
        user_id: Uuid,
        kind: &str,
        body: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO user_notifications (id, user_id, kind, body)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(kind)
        .bind(body)
        .execute(pool)
        .await?;
        Ok(())
    }
}
