//! The hybrid retrieval engine: adaptive-alpha RRF fusion of vector and
//! lexical candidates, parent/child resolution, optional cross-encoder
//! reranking and adjacent-context stitching.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use common::{
    db::Db,
    error::AppError,
    storage::types::{
        chunk::{Chunk, ChunkHit},
        document_image::DocumentImage,
        quality::ChunkBlacklist,
    },
    utils::{config::AppConfig, embedding::EmbeddingClient},
};

use crate::fusion::{self, Fused};
use crate::preprocess::{adaptive_alpha, build_lexical_query};
use crate::reranker::{RerankDocument, RerankerClient};
use crate::RetrievedChunk;

/// Per-request knobs resolved by the caller (conversation overrides,
/// universe scope).
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Final result count.
    pub k: usize,
    pub universe_id: Option<Uuid>,
    pub hierarchical: bool,
    pub stitch_adjacent: bool,
    pub rerank: bool,
}

#[derive(Debug, Clone)]
pub struct RetrievalTuning {
    /// Depth of each ranked list before fusion.
    pub top_k: usize,
    /// Characters of neighbour context stitched onto each result.
    pub neighbour_preview_chars: i32,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            top_k: 20,
            neighbour_preview_chars: 150,
        }
    }
}

#[derive(Clone)]
pub struct RetrievalEngine {
    db: Db,
    embedding: EmbeddingClient,
    reranker: Option<RerankerClient>,
    hybrid_enabled: bool,
    /// `None` selects the query-adaptive alpha.
    fixed_alpha: Option<f32>,
    rerank_top_k: usize,
    rerank_return_k: usize,
    tuning: RetrievalTuning,
}

impl RetrievalEngine {
    pub fn from_config(
        db: Db,
        embedding: EmbeddingClient,
        reranker: Option<RerankerClient>,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            embedding,
            reranker,
            hybrid_enabled: config.hybrid_search_enabled,
            fixed_alpha: config.hybrid_search_alpha.fixed_value()?,
            rerank_top_k: config.reranker_top_k,
            rerank_return_k: config.reranker_return_k,
            tuning: RetrievalTuning::default(),
        })
    }

    /// Runs the full retrieval procedure for an (already enriched) query.
    #[instrument(skip_all, fields(k = options.k, hierarchical = options.hierarchical))]
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }

        let lexical_query = build_lexical_query(query);
        let mut alpha = self.resolve_alpha(query, lexical_query.as_deref());

        // Degrade to lexical-only rather than failing the request when the
        // embedding service is down, as long as a lexical leg exists.
        let query_embedding = if alpha > 0.0 {
            match self.embedding.embed_query(query).await {
                Ok(embedding) => Some(embedding),
                Err(err) if lexical_query.is_some() => {
                    warn!(error = %err, "embedding service failed, degrading to lexical-only");
                    alpha = 0.0;
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let rerank_active = options.rerank && self.reranker.is_some();
        let fused_take = if rerank_active {
            self.rerank_top_k.max(options.k)
        } else {
            options.k
        };

        let blacklist = ChunkBlacklist::all_ids(self.db.pool()).await?;

        let vector_hits = match &query_embedding {
            Some(embedding) if alpha > 0.0 => {
                Chunk::vector_search(
                    self.db.pool(),
                    embedding,
                    self.tuning.top_k,
                    options.universe_id,
                    &blacklist,
                    options.hierarchical,
                )
                .await?
            }
            _ => Vec::new(),
        };

        let lexical_hits = match &lexical_query {
            Some(tsquery) if alpha < 1.0 => {
                Chunk::lexical_search(
                    self.db.pool(),
                    tsquery,
                    self.tuning.top_k,
                    options.universe_id,
                    &blacklist,
                    options.hierarchical,
                )
                .await?
            }
            _ => Vec::new(),
        };

        debug!(
            alpha,
            vector_candidates = vector_hits.len(),
            lexical_candidates = lexical_hits.len(),
            "collected candidates"
        );

        let mut fused = fusion::fuse(vector_hits, lexical_hits, alpha, fused_take);

        if options.hierarchical {
            fused = self.resolve_parents(fused).await?;
        }

        let mut results = if rerank_active {
            self.rerank_or_fallback(query, fused, options.k).await
        } else {
            fused.truncate(options.k);
            fused
                .into_iter()
                .map(|candidate| to_retrieved(candidate, None))
                .collect()
        };

        if options.stitch_adjacent {
            self.stitch_neighbours(&mut results).await?;
        }

        self.attach_page_numbers(&mut results).await?;

        Ok(results)
    }

    /// `HYBRID_SEARCH_ENABLED=false` and stopword-only queries are pure
    /// vector; a fixed configuration alpha wins over the adaptive rules.
    fn resolve_alpha(&self, query: &str, lexical_query: Option<&str>) -> f32 {
        if !self.hybrid_enabled || lexical_query.is_none() {
            return 1.0;
        }

        self.fixed_alpha
            .unwrap_or_else(|| adaptive_alpha(query))
    }

    /// Hierarchical mode ranks children but returns parents. Each child is
    /// swapped for its parent's row while keeping the child's scores; two
    /// children of the same parent collapse into the best-ranked one.
    async fn resolve_parents(&self, fused: Vec<Fused>) -> Result<Vec<Fused>, AppError> {
        let parent_ids: Vec<Uuid> = fused
            .iter()
            .filter_map(|candidate| candidate.hit.parent_chunk_id)
            .collect();

        if parent_ids.is_empty() {
            return Ok(fused);
        }

        let parents: HashMap<Uuid, ChunkHit> = Chunk::hits_by_ids(self.db.pool(), &parent_ids)
            .await?
            .into_iter()
            .map(|hit| (hit.id, hit))
            .collect();

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(fused.len());

        for mut candidate in fused {
            let emitted_id = match candidate.hit.parent_chunk_id {
                Some(parent_id) => {
                    if let Some(parent) = parents.get(&parent_id) {
                        candidate.hit = parent.clone();
                    } else {
                        warn!(
                            chunk_id = %candidate.hit.id,
                            parent_id = %parent_id,
                            "child chunk points at a missing parent"
                        );
                    }
                    candidate.hit.id
                }
                None => candidate.hit.id,
            };

            // Fused order is best-first, so the first sighting carries the
            // best child's score.
            if seen.insert(emitted_id) {
                resolved.push(candidate);
            }
        }

        Ok(resolved)
    }

    async fn rerank_or_fallback(
        &self,
        query: &str,
        fused: Vec<Fused>,
        k: usize,
    ) -> Vec<RetrievedChunk> {
        let Some(reranker) = &self.reranker else {
            let mut fallback = fused;
            fallback.truncate(k);
            return fallback
                .into_iter()
                .map(|candidate| to_retrieved(candidate, None))
                .collect();
        };

        let documents: Vec<RerankDocument> = fused
            .iter()
            .map(|candidate| RerankDocument {
                chunk_id: candidate.hit.id,
                document_title: candidate.hit.document_title.clone(),
                content: candidate.hit.content.clone(),
                similarity: candidate.similarity(),
            })
            .collect();

        let return_k = self.rerank_return_k.min(k.max(1)).max(1);

        match reranker.rerank(query, &documents, return_k).await {
            Ok(reranked) => {
                let by_id: HashMap<Uuid, Fused> = fused
                    .into_iter()
                    .map(|candidate| (candidate.hit.id, candidate))
                    .collect();

                let mut results = Vec::with_capacity(return_k);
                for item in reranked.into_iter().take(return_k) {
                    if let Some(candidate) = by_id.get(&item.document.chunk_id) {
                        results.push(to_retrieved(candidate.clone(), Some(item.rerank_score)));
                    }
                }
                results
            }
            Err(err) => {
                warn!(error = %err, "reranker unavailable, fallback");
                let mut fallback = fused;
                fallback.truncate(k);
                fallback
                    .into_iter()
                    .map(|candidate| to_retrieved(candidate, None))
                    .collect()
            }
        }
    }

    /// Page numbers come from the reader's extracted images: a chunk that
    /// owns images is annotated with their lowest page.
    async fn attach_page_numbers(&self, results: &mut [RetrievedChunk]) -> Result<(), AppError> {
        if results.is_empty() {
            return Ok(());
        }

        let chunk_ids: Vec<Uuid> = results.iter().map(|chunk| chunk.chunk_id).collect();
        let pages: HashMap<Uuid, i32> =
            DocumentImage::pages_for_chunks(self.db.pool(), &chunk_ids)
                .await?
                .into_iter()
                .collect();

        for chunk in results.iter_mut() {
            chunk.page_number = pages.get(&chunk.chunk_id).copied();
        }

        Ok(())
    }

    /// Fetches ~150-character previews of each result's sequence
    /// neighbours. Neighbours never count toward `k`.
    async fn stitch_neighbours(&self, results: &mut [RetrievedChunk]) -> Result<(), AppError> {
        let neighbour_ids: Vec<Uuid> = results
            .iter()
            .flat_map(|chunk| [chunk.prev_chunk_id, chunk.next_chunk_id])
            .flatten()
            .collect();

        if neighbour_ids.is_empty() {
            return Ok(());
        }

        let previews: HashMap<Uuid, String> = Chunk::content_previews(
            self.db.pool(),
            &neighbour_ids,
            self.tuning.neighbour_preview_chars,
        )
        .await?
        .into_iter()
        .collect();

        for chunk in results.iter_mut() {
            chunk.prev_preview = chunk
                .prev_chunk_id
                .and_then(|id| previews.get(&id).cloned());
            chunk.next_preview = chunk
                .next_chunk_id
                .and_then(|id| previews.get(&id).cloned());
        }

        Ok(())
    }
}

fn to_retrieved(candidate: Fused, rerank_score: Option<f32>) -> RetrievedChunk {
    let similarity = candidate.similarity();
    let Fused { hit, fused, .. } = candidate;

    RetrievedChunk {
        chunk_id: hit.id,
        document_id: hit.document_id,
        document_title: hit.document_title,
        chunk_index: hit.chunk_index,
        content: hit.content,
        chunk_level: hit.chunk_level,
        heading_context: hit.heading_context,
        section_hierarchy: hit.section_hierarchy,
        similarity,
        fused_score: fused,
        rerank_score,
        page_number: None,
        prev_chunk_id: hit.prev_chunk_id,
        next_chunk_id: hit.next_chunk_id,
        prev_preview: None,
        next_preview: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::ChunkLevel;

    fn options() -> RetrievalOptions {
        RetrievalOptions {
            k: 5,
            universe_id: None,
            hierarchical: false,
            stitch_adjacent: true,
            rerank: false,
        }
    }

    fn fused_hit(parent: Option<Uuid>, level: ChunkLevel, fused_score: f32) -> Fused {
        Fused {
            hit: ChunkHit {
                id: Uuid::new_v4(),
                document_id: Uuid::nil(),
                document_title: "Manuel".to_string(),
                chunk_index: 0,
                content: "enfant".to_string(),
                heading_context: String::new(),
                section_hierarchy: Vec::new(),
                document_position: 0.0,
                prev_chunk_id: None,
                next_chunk_id: None,
                parent_chunk_id: parent,
                chunk_level: level,
                score: 0.5,
            },
            scores: crate::fusion::Scores {
                vector_similarity: Some(0.5),
                lexical_rank_score: None,
            },
            fused: fused_score,
        }
    }

    #[test]
    fn test_options_carry_request_scoping() {
        let options = options();
        assert_eq!(options.k, 5);
        assert!(options.stitch_adjacent);
        assert!(!options.rerank);
    }

    #[test]
    fn test_to_retrieved_keeps_child_scores() {
        let candidate = fused_hit(None, ChunkLevel::Parent, 0.031);
        let retrieved = to_retrieved(candidate, Some(2.4));
        assert!((retrieved.similarity - 0.5).abs() < f32::EPSILON);
        assert!((retrieved.fused_score - 0.031).abs() < f32::EPSILON);
        assert_eq!(retrieved.rerank_score, Some(2.4));
        assert_eq!(retrieved.chunk_level, ChunkLevel::Parent);
        // Pages are attached later, from the images the chunk owns.
        assert_eq!(retrieved.page_number, None);
    }
}
