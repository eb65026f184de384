#![allow(clippy::missing_docs_in_private_items)]

pub mod engine;
pub mod fusion;
pub mod preprocess;
pub mod reranker;

use common::storage::types::chunk::ChunkLevel;
use uuid::Uuid;

pub use engine::{RetrievalEngine, RetrievalOptions, RetrievalTuning};
pub use reranker::RerankerClient;

/// A ranked passage handed to the orchestrator. In hierarchical mode the
/// content is the parent chunk's, carrying the best child's scores.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub chunk_index: i32,
    pub content: String,
    pub chunk_level: ChunkLevel,
    pub heading_context: String,
    pub section_hierarchy: Vec<String>,
    /// Cosine similarity to the query embedding; 0 when the chunk only
    /// surfaced through the lexical list.
    pub similarity: f32,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    /// Lowest page of the document images owned by this chunk, when any.
    pub page_number: Option<i32>,
    pub prev_chunk_id: Option<Uuid>,
    pub next_chunk_id: Option<Uuid>,
    pub prev_preview: Option<String>,
    pub next_preview: Option<String>,
}
