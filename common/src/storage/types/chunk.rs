use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::types::ColumnEnumError;

/// Position of a chunk in the parent/child hierarchy. Flat ingestion only
/// produces parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    Parent,
    Child,
}

impl ChunkLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ColumnEnumError> {
        match value {
            "parent" => Ok(Self::Parent),
            "child" => Ok(Self::Child),
            other => Err(ColumnEnumError {
                column: "chunk_level",
                value: other.to_owned(),
            }),
        }
    }
}

/// A chunk prepared by the chunker, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
    pub section_hierarchy: Vec<String>,
    pub heading_context: String,
    pub document_position: f32,
    pub chunk_level: ChunkLevel,
    /// Index into the sibling list of the parent this child belongs to, in
    /// the order parents were produced. `None` for parents and flat chunks.
    pub parent_index: Option<usize>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub section_hierarchy: Vec<String>,
    pub heading_context: String,
    pub document_position: f32,
    pub prev_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
    pub parent_chunk_id: Option<Uuid>,
    pub chunk_level: ChunkLevel,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Chunk {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let level: String = row.try_get("chunk_level")?;
        Ok(Self {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            chunk_index: row.try_get("chunk_index")?,
            content: row.try_get("content")?,
            token_count: row.try_get("token_count")?,
            section_hierarchy: row.try_get("section_hierarchy")?,
            heading_context: row.try_get("heading_context")?,
            document_position: row.try_get("document_position")?,
            prev_chunk_id: row.try_get("prev_chunk_id")?,
            next_chunk_id: row.try_get("next_chunk_id")?,
            parent_chunk_id: row.try_get("parent_chunk_id")?,
            chunk_level: ChunkLevel::parse(&level)
                .map_err(|_| ColumnEnumError::decode("chunk_level", &level))?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A retrieval candidate: chunk columns joined with its document title and
/// the score of whichever ranked list produced it.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub chunk_index: i32,
    pub content: String,
    pub heading_context: String,
    pub section_hierarchy: Vec<String>,
    pub document_position: f32,
    pub prev_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
    pub parent_chunk_id: Option<Uuid>,
    pub chunk_level: ChunkLevel,
    pub score: f32,
}

impl FromRow<'_, PgRow> for ChunkHit {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let level: String = row.try_get("chunk_level")?;
        Ok(Self {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            document_title: row.try_get("document_title")?,
            chunk_index: row.try_get("chunk_index")?,
            content: row.try_get("content")?,
            heading_context: row.try_get("heading_context")?,
            section_hierarchy: row.try_get("section_hierarchy")?,
            document_position: row.try_get("document_position")?,
            prev_chunk_id: row.try_get("prev_chunk_id")?,
            next_chunk_id: row.try_get("next_chunk_id")?,
            parent_chunk_id: row.try_get("parent_chunk_id")?,
            chunk_level: ChunkLevel::parse(&level)
                .map_err(|_| ColumnEnumError::decode("chunk_level", &level))?,
            score: row.try_get("score")?,
        })
    }
}

const HIT_COLUMNS: &str = "c.id, c.document_id, d.title AS document_title, c.chunk_index, \
     c.content, c.heading_context, c.section_hierarchy, c.document_position, \
     c.prev_chunk_id, c.next_chunk_id, c.parent_chunk_id, c.chunk_level";

impl Chunk {
    /// Inserts a document's chunks inside the ingestion transaction,
    /// assigning contiguous `chunk_index` values in input order. Returns the
    /// assigned ids, parallel to the input.
    pub async fn insert_batch(
        tx: &mut Transaction<'_, Postgres>,
        document_id: Uuid,
        chunks: &[NewChunk],
    ) -> Result<Vec<Uuid>, AppError> {
        let mut ids = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let id = Uuid::new_v4();
            let chunk_index = i32::try_from(index)
                .map_err(|_| AppError::Integrity("chunk index overflow".into()))?;
            let token_count = i32::try_from(chunk.token_count)
                .map_err(|_| AppError::Integrity("token count overflow".into()))?;

            sqlx::query(
                "INSERT INTO chunks
                     (id, document_id, chunk_index, content, embedding, token_count,
                      section_hierarchy, heading_context, document_position,
                      chunk_level, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(id)
            .bind(document_id)
            .bind(chunk_index)
            .bind(&chunk.content)
            .bind(Vector::from(chunk.embedding.clone()))
            .bind(token_count)
            .bind(&chunk.section_hierarchy)
            .bind(&chunk.heading_context)
            .bind(chunk.document_position)
            .bind(chunk.chunk_level.as_str())
            .bind(&chunk.metadata)
            .execute(&mut **tx)
            .await?;

            ids.push(id);
        }

        Ok(ids)
    }

    /// Links `prev_chunk_id`/`next_chunk_id` over a sequence of sibling ids,
    /// in the same transaction as the inserts.
    pub async fn link_sequence(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
    ) -> Result<(), AppError> {
        for (position, id) in ids.iter().enumerate() {
            let prev = position.checked_sub(1).and_then(|p| ids.get(p)).copied();
            let next = ids.get(position.wrapping_add(1)).copied();

            sqlx::query("UPDATE chunks SET prev_chunk_id = $1, next_chunk_id = $2 WHERE id = $3")
                .bind(prev)
                .bind(next)
                .bind(id)
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }

    /// Points child chunks at their parents. Pairs are (child id, parent id)
    /// within the same document.
    pub async fn link_parents(
        tx: &mut Transaction<'_, Postgres>,
        pairs: &[(Uuid, Uuid)],
    ) -> Result<(), AppError> {
        for (child, parent) in pairs {
            sqlx::query("UPDATE chunks SET parent_chunk_id = $1 WHERE id = $2")
                .bind(parent)
                .bind(child)
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Self>, AppError> {
        let chunk = sqlx::query_as::<_, Self>(
            "SELECT id, document_id, chunk_index, content, token_count, section_hierarchy,
                    heading_context, document_position, prev_chunk_id, next_chunk_id,
                    parent_chunk_id, chunk_level, created_at
             FROM chunks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(chunk)
    }

    pub async fn count_for_document(pool: &PgPool, document_id: Uuid) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .fetch_one(pool)
            .await?;
        Ok(count.0)
    }

    /// Ranks candidates by cosine similarity. `score` is `1 - distance`.
    /// Blacklisted ids are excluded before ranking; universe scoping keeps
    /// documents in the given universe or unscoped ones.
    pub async fn vector_search(
        pool: &PgPool,
        query_embedding: &[f32],
        top_k: usize,
        universe_id: Option<Uuid>,
        exclude: &[Uuid],
        children_only: bool,
    ) -> Result<Vec<ChunkHit>, AppError> {
        let sql = format!(
            "SELECT {HIT_COLUMNS}, (1 - (c.embedding <=> $1))::float4 AS score
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE ($2::uuid IS NULL OR d.universe_id = $2 OR d.universe_id IS NULL)
               AND NOT (c.id = ANY($3))
               AND (NOT $4 OR c.chunk_level = 'child')
             ORDER BY c.embedding <=> $1
             LIMIT $5"
        );

        let hits = sqlx::query_as::<_, ChunkHit>(&sql)
            .bind(Vector::from(query_embedding.to_vec()))
            .bind(universe_id)
            .bind(exclude)
            .bind(children_only)
            .bind(i64::try_from(top_k).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await?;

        Ok(hits)
    }

    /// Ranks candidates by French full-text rank over `content_tsv`.
    /// `tsquery` is the preprocessed AND-joined term list.
    pub async fn lexical_search(
        pool: &PgPool,
        tsquery: &str,
        top_k: usize,
        universe_id: Option<Uuid>,
        exclude: &[Uuid],
        children_only: bool,
    ) -> Result<Vec<ChunkHit>, AppError> {
        let sql = format!(
            "SELECT {HIT_COLUMNS}, ts_rank_cd(c.content_tsv, query)::float4 AS score
             FROM chunks c
             JOIN documents d ON d.id = c.document_id,
                  to_tsquery('french', $1) query
             WHERE c.content_tsv @@ query
               AND ($2::uuid IS NULL OR d.universe_id = $2 OR d.universe_id IS NULL)
               AND NOT (c.id = ANY($3))
               AND (NOT $4 OR c.chunk_level = 'child')
             ORDER BY score DESC
             LIMIT $5"
        );

        let hits = sqlx::query_as::<_, ChunkHit>(&sql)
            .bind(tsquery)
            .bind(universe_id)
            .bind(exclude)
            .bind(children_only)
            .bind(i64::try_from(top_k).unwrap_or(i64::MAX))
            .fetch_all(pool)
            .await?;

        Ok(hits)
    }

    /// Fetches chunks by id in hit shape, without a ranking score. Used to
    /// swap children for their parents after fusion.
    pub async fn hits_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<ChunkHit>, AppError> {
        let sql = format!(
            "SELECT {HIT_COLUMNS}, 0::float4 AS score
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.id = ANY($1)"
        );

        let hits = sqlx::query_as::<_, ChunkHit>(&sql)
            .bind(ids)
            .fetch_all(pool)
            .await?;

        Ok(hits)
    }

    /// Distinct documents owning the given chunks.
    pub async fn document_ids_for(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT DISTINCT document_id FROM chunks WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// First `max_chars` characters of each requested neighbour, keyed by id.
    pub async fn content_previews(
        pool: &PgPool,
        ids: &[Uuid],
        max_chars: i32,
    ) -> Result<Vec<(Uuid, String)>, AppError> {
        let rows: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, LEFT(content, $2) FROM chunks WHERE id = ANY($1)")
                .bind(ids)
                .bind(max_chars)
                .fetch_all(pool)
                .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_level_round_trip() {
        for level in [ChunkLevel::Parent, ChunkLevel::Child] {
            assert_eq!(ChunkLevel::parse(level.as_str()).unwrap(), level);
        }
    }

    #[test]
    fn test_chunk_level_rejects_unknown() {
        let err = ChunkLevel::parse("grandparent").unwrap_err();
        assert_eq!(err.column, "chunk_level");
        assert_eq!(err.value, "grandparent");
    }

    #[test]
    fn test_chunk_level_serde_uses_lowercase() {
        let encoded = serde_json::to_string(&ChunkLevel::Parent).unwrap();
        assert_eq!(encoded, "\"parent\"");
        let decoded: ChunkLevel = serde_json::from_str("\"child\"").unwrap();
        assert_eq!(decoded, ChunkLevel::Child);
    }
}
