use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use common::storage::types::ingestion_job::IngestionJob;

use crate::{api_state::ApiState, error::ApiError};

/// File types the document reader accepts.
const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "odt", "txt", "md"];

/// Uploads past this size are rejected before a job row is created.
const MAX_FILE_SIZE_BYTES: i64 = 50 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct EnqueueJobParams {
    pub filename: String,
    pub file_size: i64,
    #[serde(default)]
    pub universe_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub filename: String,
    pub status: String,
    pub progress: i16,
    pub document_id: Option<Uuid>,
    pub chunks_created: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<IngestionJob> for JobResponse {
    fn from(job: IngestionJob) -> Self {
        Self {
            id: job.id,
            filename: job.filename,
            status: job.status.to_string(),
            progress: job.progress,
            document_id: job.document_id,
            chunks_created: job.chunks_created,
            error_message: job.error_message,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

pub(crate) fn validate_upload(filename: &str, file_size: i64) -> Result<(), ApiError> {
    if filename.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "filename must not be empty".to_string(),
        ));
    }

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::ValidationError(format!(
            "unsupported file type \"{extension}\"; accepted: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    if file_size <= 0 {
        return Err(ApiError::ValidationError(
            "file_size must be positive".to_string(),
        ));
    }
    if file_size > MAX_FILE_SIZE_BYTES {
        return Err(ApiError::ValidationError(format!(
            "file exceeds the {MAX_FILE_SIZE_BYTES} byte limit"
        )));
    }

    Ok(())
}

/// Validates and enqueues an ingestion job; the worker picks it up from the
/// shared queue. Invalid uploads never create a job row.
pub async fn enqueue_job(
    State(state): State<ApiState>,
    Json(params): Json<EnqueueJobParams>,
) -> Result<impl IntoResponse, ApiError> {
    validate_upload(&params.filename, params.file_size)?;

    let job = IngestionJob::enqueue(
        state.db.pool(),
        &params.filename,
        params.file_size,
        params.universe_id,
        state.config.use_hierarchical_chunks,
    )
    .await?;

    info!(job_id = %job.id, filename = %job.filename, "ingestion job enqueued");
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

pub async fn list_jobs(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = IngestionJob::list_recent(state.db.pool(), 100).await?;
    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    Ok(Json(jobs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_supported_files() {
        assert!(validate_upload("guide_rh.pdf", 1024).is_ok());
        assert!(validate_upload("notes.MD", 10).is_ok());
    }

    #[test]
    fn test_rejects_empty_filename() {
        assert!(validate_upload("", 1024).is_err());
        assert!(validate_upload("   ", 1024).is_err());
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        assert!(validate_upload("malware.exe", 1024).is_err());
        assert!(validate_upload("sans_extension", 1024).is_err());
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(validate_upload("guide.pdf", 0).is_err());
        assert!(validate_upload("guide.pdf", -5).is_err());
        assert!(validate_upload("guide.pdf", MAX_FILE_SIZE_BYTES + 1).is_err());
    }
}
