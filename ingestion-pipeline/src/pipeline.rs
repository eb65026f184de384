//! Per-job ingestion: read, chunk, embed, persist — with the whole
//! document committed in one transaction or not at all.

use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use common::{
    db::Db,
    error::AppError,
    storage::types::{
        chunk::{Chunk, NewChunk},
        document::{Document, DocumentMetadata},
        document_image::{DocumentImage, NewDocumentImage},
        ingestion_job::IngestionJob,
    },
    utils::{config::AppConfig, embedding::EmbeddingClient},
};

use crate::chunker::{chunk_document, ChunkerOutput};
use crate::reader::DocumentReader;

pub struct IngestionPipeline {
    db: Db,
    reader: DocumentReader,
    embedding: EmbeddingClient,
    chunk_overlap: usize,
}

impl IngestionPipeline {
    pub fn new(
        db: Db,
        reader: DocumentReader,
        embedding: EmbeddingClient,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            reader,
            embedding,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Drives one claimed job to a terminal state. A failure anywhere rolls
    /// back the document transaction and records a human-readable error on
    /// the job row; readers never observe a partial document.
    #[tracing::instrument(skip_all, fields(job_id = %job.id, filename = %job.filename))]
    pub async fn process_job(&self, job: IngestionJob) -> Result<(), AppError> {
        let started = Instant::now();

        match self.drive(&job).await {
            Ok((document_id, chunks_created)) => {
                IngestionJob::mark_completed(self.db.pool(), job.id, document_id, chunks_created)
                    .await?;
                info!(
                    %document_id,
                    chunks_created,
                    total_ms = started.elapsed().as_millis() as u64,
                    "ingestion job completed"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                IngestionJob::mark_failed(self.db.pool(), job.id, &reason).await?;
                warn!(error = %reason, "ingestion job failed");
                Err(err)
            }
        }
    }

    async fn drive(&self, job: &IngestionJob) -> Result<(Uuid, i32), AppError> {
        let path = self.reader.resolve_upload(job.id, &job.filename)?;
        let read = self.reader.read(&path).await?;
        IngestionJob::set_progress(self.db.pool(), job.id, 25).await?;

        let output = chunk_document(
            &read.text,
            &read.headings,
            self.chunk_overlap,
            job.hierarchical,
        )?;
        IngestionJob::set_progress(self.db.pool(), job.id, 50).await?;

        let texts: Vec<String> = output
            .chunks
            .iter()
            .map(|chunk| chunk.content.clone())
            .collect();
        let embeddings = self.embedding.embed_passages(&texts).await?;
        IngestionJob::set_progress(self.db.pool(), job.id, 75).await?;

        let new_chunks = assemble_chunks(&output, embeddings, self.chunk_overlap)?;

        let mut tx = self.db.pool().begin().await?;

        let metadata = DocumentMetadata {
            word_count: output.word_count,
            language: "fr".to_string(),
            chunk_policy: output.policy.as_str().to_string(),
            hierarchical: job.hierarchical,
        };
        let document_id = Document::insert(
            &mut tx,
            &title_from_filename(&job.filename),
            &job.filename,
            &read.text,
            job.universe_id,
            &metadata,
        )
        .await?;

        let ids = Chunk::insert_batch(&mut tx, document_id, &new_chunks).await?;

        // Adjacency is linked per level so stitched neighbours stay
        // meaningful: parents chain with parents, children with children.
        let (parent_ids, child_ids) = ids.split_at(output.parent_count.min(ids.len()));
        Chunk::link_sequence(&mut tx, parent_ids).await?;
        if !child_ids.is_empty() {
            Chunk::link_sequence(&mut tx, child_ids).await?;

            let mut pairs = Vec::with_capacity(child_ids.len());
            for (child_id, chunk) in child_ids
                .iter()
                .zip(new_chunks.iter().skip(output.parent_count))
            {
                let parent_index = chunk.parent_index.ok_or_else(|| {
                    AppError::Integrity("child chunk lost its parent reference".to_string())
                })?;
                let parent_id = parent_ids.get(parent_index).ok_or_else(|| {
                    AppError::Integrity(format!("child references unknown parent {parent_index}"))
                })?;
                pairs.push((*child_id, *parent_id));
            }
            Chunk::link_parents(&mut tx, &pairs).await?;
        }

        if !read.images.is_empty() {
            let owners = image_owner_ids(&output, &ids, &read.images);
            DocumentImage::insert_batch(&mut tx, document_id, &read.images, &owners).await?;
        }

        tx.commit().await?;

        let chunks_created = i32::try_from(ids.len())
            .map_err(|_| AppError::Integrity("chunk count overflow".to_string()))?;
        Ok((document_id, chunks_created))
    }
}

fn assemble_chunks(
    output: &ChunkerOutput,
    embeddings: Vec<Vec<f32>>,
    overlap_tokens: usize,
) -> Result<Vec<NewChunk>, AppError> {
    if embeddings.len() != output.chunks.len() {
        return Err(AppError::Integrity(format!(
            "{} embeddings for {} chunks",
            embeddings.len(),
            output.chunks.len()
        )));
    }

    let new_chunks = output
        .chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| NewChunk {
            content: chunk.content.clone(),
            embedding,
            token_count: chunk.token_count,
            section_hierarchy: chunk.section_hierarchy.clone(),
            heading_context: chunk.heading_context.clone(),
            document_position: chunk.document_position,
            chunk_level: chunk.level,
            parent_index: chunk.parent_index,
            metadata: serde_json::json!({
                "size_category": output.policy.as_str(),
                "overlap_tokens": overlap_tokens,
            }),
        })
        .collect();

    Ok(new_chunks)
}

/// Resolves each image to the chunk whose byte span covers its text
/// offset. Only top-level chunks own images (the parent prefix of the
/// output, which is the whole list in flat mode); overlapping spans go to
/// the earliest chunk. Images without an offset stay unowned.
fn image_owner_ids(
    output: &ChunkerOutput,
    chunk_ids: &[Uuid],
    images: &[NewDocumentImage],
) -> Vec<Option<Uuid>> {
    images
        .iter()
        .map(|image| {
            image.text_offset.and_then(|offset| {
                output
                    .chunks
                    .iter()
                    .take(output.parent_count)
                    .position(|chunk| chunk.covers(offset))
                    .and_then(|index| chunk_ids.get(index).copied())
            })
        })
        .collect()
}

fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem);
    stem.replace(['_', '-'], " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker;

    #[test]
    fn test_title_from_filename() {
        assert_eq!(
            title_from_filename("guide_teletravail_2024.pdf"),
            "guide teletravail 2024"
        );
        assert_eq!(title_from_filename("NOTE-RTT.docx"), "NOTE RTT");
        assert_eq!(title_from_filename("sans extension"), "sans extension");
    }

    #[test]
    fn test_assemble_rejects_embedding_count_mismatch() {
        let text = (0..1000)
            .map(|index| format!("mot{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        let output = chunker::chunk_document(&text, &[], 100, false).unwrap();

        let err = assemble_chunks(&output, vec![], 100).unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
    }

    fn image_at(text_offset: Option<usize>, page_number: i32) -> NewDocumentImage {
        NewDocumentImage {
            page_number,
            position: Default::default(),
            ocr_text: String::new(),
            description: String::new(),
            confidence: 0.9,
            storage_path: "/img/p.png".to_string(),
            text_offset,
        }
    }

    #[test]
    fn test_image_owner_ids_match_covering_chunk() {
        let text = (0..3000)
            .map(|index| format!("mot{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        let output = chunker::chunk_document(&text, &[], 0, false).unwrap();
        assert!(output.chunks.len() > 1);

        let chunk_ids: Vec<Uuid> = output.chunks.iter().map(|_| Uuid::new_v4()).collect();

        let first_span_offset = output.chunks[0].start_offset + 10;
        let last_span_offset = output.chunks.last().unwrap().start_offset + 10;
        let images = vec![
            image_at(Some(first_span_offset), 1),
            image_at(Some(last_span_offset), 9),
            image_at(None, 4),
        ];

        let owners = image_owner_ids(&output, &chunk_ids, &images);

        assert_eq!(owners[0], Some(chunk_ids[0]));
        assert_eq!(owners[1], Some(*chunk_ids.last().unwrap()));
        assert_eq!(owners[2], None);
    }

    #[test]
    fn test_image_owner_ids_only_consider_parents_in_hierarchical_mode() {
        let text = (0..3000)
            .map(|index| format!("mot{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        let output = chunker::chunk_document(&text, &[], 0, true).unwrap();
        assert!(output.parent_count < output.chunks.len());

        let chunk_ids: Vec<Uuid> = output.chunks.iter().map(|_| Uuid::new_v4()).collect();
        let images = vec![image_at(Some(5), 1)];

        let owners = image_owner_ids(&output, &chunk_ids, &images);

        let owner = owners[0].expect("image should land in a parent chunk");
        let owner_index = chunk_ids.iter().position(|id| *id == owner).unwrap();
        assert!(owner_index < output.parent_count, "owner must be a parent");
    }

    #[test]
    fn test_assemble_pairs_chunks_with_embeddings_in_order() {
        let text = (0..1000)
            .map(|index| format!("mot{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        let output = chunker::chunk_document(&text, &[], 100, false).unwrap();

        let embeddings: Vec<Vec<f32>> = (0..output.chunks.len())
            .map(|index| vec![index as f32; 4])
            .collect();
        let chunks = assemble_chunks(&output, embeddings, 100).unwrap();

        assert_eq!(chunks.len(), output.chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            assert!((chunk.embedding[0] - index as f32).abs() < f32::EPSILON);
            assert_eq!(chunk.content, output.chunks[index].content);
        }
    }
}
