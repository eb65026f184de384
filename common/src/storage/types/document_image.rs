use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;

/// Bounding box of an extracted image on its page, as reported by the
/// document reader.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PositionBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentImage {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_id: Option<Uuid>,
    pub page_number: i32,
    pub position: sqlx::types::Json<PositionBox>,
    pub ocr_text: String,
    pub description: String,
    pub confidence: f32,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

/// Image payload handed over by the reader, persisted with its document.
/// `text_offset` is the byte position in the normalised text where the
/// image sits; it ties the image to the chunk covering that span.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocumentImage {
    pub page_number: i32,
    #[serde(default)]
    pub position: PositionBox,
    #[serde(default)]
    pub ocr_text: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: f32,
    pub storage_path: String,
    #[serde(default)]
    pub text_offset: Option<usize>,
}

impl DocumentImage {
    /// Inserts the reader's images with their owning chunk, resolved by the
    /// caller from each image's text offset. `chunk_ids` is parallel to
    /// `images`; `None` means the image could not be placed.
    pub async fn insert_batch(
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
        images: &[NewDocumentImage],
        chunk_ids: &[Option<Uuid>],
    ) -> Result<(), AppError> {
        if images.len() != chunk_ids.len() {
            return Err(AppError::Integrity(format!(
                "{} chunk assignments for {} images",
                chunk_ids.len(),
                images.len()
            )));
        }

        for (image, chunk_id) in images.iter().zip(chunk_ids) {
            sqlx::query(
                "INSERT INTO document_images
                     (id, document_id, chunk_id, page_number, position, ocr_text,
                      description, confidence, storage_path)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(chunk_id)
            .bind(image.page_number)
            .bind(sqlx::types::Json(image.position))
            .bind(&image.ocr_text)
            .bind(&image.description)
            .bind(image.confidence)
            .bind(&image.storage_path)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Lowest page number of the images owned by each chunk. Feeds the
    /// page annotation on retrieval sources.
    pub async fn pages_for_chunks(
        pool: &PgPool,
        chunk_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, i32)>, AppError> {
        let rows: Vec<(Uuid, i32)> = sqlx::query_as(
            "SELECT chunk_id, MIN(page_number)
             FROM document_images
             WHERE chunk_id = ANY($1)
             GROUP BY chunk_id",
        )
        .bind(chunk_ids)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn for_document(pool: &PgPool, document_id: Uuid) -> Result<Vec<Self>, AppError> {
        let images = sqlx::query_as::<_, Self>(
            "SELECT id, document_id, chunk_id, page_number, position, ocr_text,
                    description, confidence, storage_path, created_at
             FROM document_images
             WHERE document_id = $1
             ORDER BY page_number",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await?;
        Ok(images)
    }
}
