//! Reciprocal Rank Fusion of the vector and lexical candidate lists.

use std::cmp::Ordering;
use std::collections::HashMap;

use common::storage::types::chunk::ChunkHit;
use uuid::Uuid;

/// RRF dampening constant; ranks are 1-based.
pub const RRF_K: f32 = 60.0;

/// Subscores a candidate gathered from the two ranked lists. An absent rank
/// contributes nothing to the fused score.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scores {
    pub vector_similarity: Option<f32>,
    pub lexical_rank_score: Option<f32>,
}

/// A candidate with its accumulated subscores and fused RRF score.
#[derive(Debug, Clone)]
pub struct Fused {
    pub hit: ChunkHit,
    pub scores: Scores,
    pub fused: f32,
}

impl Fused {
    /// Cosine similarity when the vector list saw this chunk, 0 otherwise.
    pub fn similarity(&self) -> f32 {
        self.scores.vector_similarity.unwrap_or(0.0)
    }
}

fn rrf_term(rank: Option<usize>) -> f32 {
    match rank {
        Some(rank) => 1.0 / (RRF_K + rank as f32),
        None => 0.0,
    }
}

/// Fuses the two ranked lists and returns the top `take` candidates.
///
/// `score(c) = alpha / (60 + rank_vec) + (1 - alpha) / (60 + rank_lex)`,
/// ties broken by higher vector similarity, then lower `chunk_index`.
pub fn fuse(
    vector_hits: Vec<ChunkHit>,
    lexical_hits: Vec<ChunkHit>,
    alpha: f32,
    take: usize,
) -> Vec<Fused> {
    let alpha = alpha.clamp(0.0, 1.0);

    struct Candidate {
        hit: ChunkHit,
        vector_rank: Option<usize>,
        lexical_rank: Option<usize>,
        scores: Scores,
    }

    let mut candidates: HashMap<Uuid, Candidate> = HashMap::new();

    for (index, hit) in vector_hits.into_iter().enumerate() {
        let rank = index.saturating_add(1);
        let similarity = hit.score;
        candidates.insert(
            hit.id,
            Candidate {
                hit,
                vector_rank: Some(rank),
                lexical_rank: None,
                scores: Scores {
                    vector_similarity: Some(similarity),
                    lexical_rank_score: None,
                },
            },
        );
    }

    for (index, hit) in lexical_hits.into_iter().enumerate() {
        let rank = index.saturating_add(1);
        let lexical_score = hit.score;
        candidates
            .entry(hit.id)
            .and_modify(|candidate| {
                candidate.lexical_rank = Some(rank);
                candidate.scores.lexical_rank_score = Some(lexical_score);
            })
            .or_insert(Candidate {
                hit,
                vector_rank: None,
                lexical_rank: Some(rank),
                scores: Scores {
                    vector_similarity: None,
                    lexical_rank_score: Some(lexical_score),
                },
            });
    }

    let mut fused: Vec<Fused> = candidates
        .into_values()
        .map(|candidate| {
            let score = alpha * rrf_term(candidate.vector_rank)
                + (1.0 - alpha) * rrf_term(candidate.lexical_rank);
            Fused {
                hit: candidate.hit,
                scores: candidate.scores,
                fused: score,
            }
        })
        .collect();

    fused.sort_by(compare);
    fused.truncate(take);
    fused
}

/// Ordering of fused candidates: fused score descending, then vector
/// similarity descending, then `chunk_index` ascending.
fn compare(a: &Fused, b: &Fused) -> Ordering {
    b.fused
        .partial_cmp(&a.fused)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.similarity()
                .partial_cmp(&a.similarity())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.hit.chunk_index.cmp(&b.hit.chunk_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::ChunkLevel;

    fn hit(id: Uuid, chunk_index: i32, score: f32) -> ChunkHit {
        ChunkHit {
            id,
            document_id: Uuid::nil(),
            document_title: "Guide interne".to_string(),
            chunk_index,
            content: format!("chunk {chunk_index}"),
            heading_context: String::new(),
            section_hierarchy: Vec::new(),
            document_position: 0.0,
            prev_chunk_id: None,
            next_chunk_id: None,
            parent_chunk_id: None,
            chunk_level: ChunkLevel::Parent,
            score,
        }
    }

    #[test]
    fn test_chunk_in_both_lists_beats_single_list_chunks() {
        let shared = Uuid::new_v4();
        let vector_only = Uuid::new_v4();
        let lexical_only = Uuid::new_v4();

        let fused = fuse(
            vec![hit(vector_only, 0, 0.95), hit(shared, 1, 0.90)],
            vec![hit(lexical_only, 2, 3.0), hit(shared, 1, 2.0)],
            0.5,
            10,
        );

        assert_eq!(fused[0].hit.id, shared);
        // 0.5/61 + 0.5/62 > 0.5/61
        assert!(fused[0].fused > fused[1].fused);
    }

    #[test]
    fn test_absent_rank_contributes_zero() {
        let id = Uuid::new_v4();
        let fused = fuse(vec![hit(id, 0, 0.8)], vec![], 0.5, 10);

        assert_eq!(fused.len(), 1);
        assert!((fused[0].fused - 0.5 / 61.0).abs() < 1e-6);
        assert!(fused[0].scores.lexical_rank_score.is_none());
    }

    #[test]
    fn test_alpha_zero_ignores_vector_list() {
        let vector_top = Uuid::new_v4();
        let lexical_top = Uuid::new_v4();

        let fused = fuse(
            vec![hit(vector_top, 0, 0.99)],
            vec![hit(lexical_top, 1, 5.0)],
            0.0,
            10,
        );

        assert_eq!(fused[0].hit.id, lexical_top);
        assert!((fused[1].fused - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_keyword_bias_lifts_lexical_rank_one() {
        // A chunk ranked 8th by embedding similarity but 1st lexically must
        // overtake pure-vector chunks when alpha favors keywords.
        let mut vector_hits = Vec::new();
        for index in 0..8 {
            vector_hits.push(hit(Uuid::new_v4(), index, 0.9 - 0.01 * index as f32));
        }
        let acronym_chunk = hit(Uuid::new_v4(), 8, 0.8);
        vector_hits.push(acronym_chunk.clone());

        let fused = fuse(vector_hits, vec![acronym_chunk], 0.3, 5);

        assert!(
            fused.iter().take(5).any(|f| f.hit.chunk_index == 8),
            "lexical rank 1 should put the chunk in the top 5"
        );
    }

    fn fused_with(chunk_index: i32, similarity: Option<f32>, fused: f32) -> Fused {
        Fused {
            hit: hit(Uuid::new_v4(), chunk_index, similarity.unwrap_or(0.0)),
            scores: Scores {
                vector_similarity: similarity,
                lexical_rank_score: None,
            },
            fused,
        }
    }

    #[test]
    fn test_tie_break_prefers_higher_similarity() {
        let weaker = fused_with(1, Some(0.4), 0.1);
        let stronger = fused_with(5, Some(0.9), 0.1);
        assert_eq!(compare(&stronger, &weaker), Ordering::Less);
    }

    #[test]
    fn test_tie_break_falls_back_to_lower_chunk_index() {
        let later = fused_with(9, Some(0.5), 0.1);
        let earlier = fused_with(3, Some(0.5), 0.1);
        assert_eq!(compare(&earlier, &later), Ordering::Less);

        let mut items = vec![later, earlier];
        items.sort_by(compare);
        assert_eq!(items[0].hit.chunk_index, 3);
    }

    #[test]
    fn test_take_truncates() {
        let vector_hits: Vec<ChunkHit> = (0..20)
            .map(|index| hit(Uuid::new_v4(), index, 0.9 - 0.01 * index as f32))
            .collect();
        let fused = fuse(vector_hits, vec![], 0.5, 5);
        assert_eq!(fused.len(), 5);
    }
}
