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
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ColumnEnumError> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ColumnEnumError {
                column: "status",
                value: other.to_owned(),
            }),
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub status: JobStatus,
    pub progress: i16,
    pub document_id: Option<Uuid>,
    pub chunks_created: i32,
    pub error_message: Option<String>,
    pub universe_id: Option<Uuid>,
    pub hierarchical: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, PgRow> for IngestionJob {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            filename: row.try_get("filename")?,
            file_size: row.try_get("file_size")?,
            status: JobStatus::parse(&status)
                .map_err(|_| ColumnEnumError::decode("status", &status))?,
            progress: row.try_get("progress")?,
            document_id: row.try_get("document_id")?,
            chunks_created: row.try_get("chunks_created")?,
            error_message: row.try_get("error_message")?,
            universe_id: row.try_get("universe_id")?,
            hierarchical: row.try_get("hierarchical")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

const COLUMNS: &str = "id, filename, file_size, status, progress, document_id, chunks_created, \
     error_message, universe_id, hierarchical, created_at, started_at, finished_at";

impl IngestionJob {
    pub async fn enqueue(
        pool: &PgPool,
        filename: &str,
        file_size: i64,
        universe_id: Option<Uuid>,
        hierarchical: bool,
    ) -> Result<Self, AppError> {
        let sql = format!(
            "INSERT INTO ingestion_jobs (id, filename, file_size, universe_id, hierarchical)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );

        let job = sqlx::query_as::<_, Self>(&sql)
            .bind(Uuid::new_v4())
            .bind(filename)
            .bind(file_size)
            .bind(universe_id)
            .bind(hierarchical)
            .fetch_one(pool)
            .await?;

        Ok(job)
    }

    /// Atomically claims the oldest pending job. `SKIP LOCKED` lets N
    /// workers coexist without handing the same job out twice.
    pub async fn claim_next_pending(pool: &PgPool) -> Result<Option<Self>, AppError> {
        let sql = format!(
            "UPDATE ingestion_jobs
             SET status = 'processing', started_at = now()
             WHERE id = (
                 SELECT id FROM ingestion_jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING {COLUMNS}"
        );

        let job = sqlx::query_as::<_, Self>(&sql).fetch_optional(pool).await?;
        Ok(job)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let sql = format!("SELECT {COLUMNS} FROM ingestion_jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    pub async fn list_recent(pool: &PgPool, limit: usize) -> Result<Vec<Self>, AppError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM ingestion_jobs ORDER BY created_at DESC LIMIT $1"
        );
        let jobs = sqlx::query_as::<_, Self>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await?;
        Ok(jobs)
    }

    pub async fn set_progress(pool: &PgPool, id: Uuid, progress: i16) -> Result<(), AppError> {
        sqlx::query("UPDATE ingestion_jobs SET progress = $1 WHERE id = $2")
            .bind(progress.clamp(0, 100))
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_completed(
        pool: &PgPool,
        id: Uuid,
        document_id: Uuid,
        chunks_created: i32,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE ingestion_jobs
             SET status = 'completed', progress = 100, document_id = $1,
                 chunks_created = $2, finished_at = now()
             WHERE id = $3",
        )
        .bind(document_id)
        .bind(chunks_created)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: the transaction already rolled back, so no partial
    /// document remains. The message is meant for the uploading user.
    pub async fn mark_failed(pool: &PgPool, id: Uuid, error_message: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE ingestion_jobs
             SET status = 'failed', error_message = $1, finished_at = now()
             WHERE id = $2",
        )
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_rejects_unknown() {
        assert!(JobStatus::parse("cancelled").is_err());
    }
}
