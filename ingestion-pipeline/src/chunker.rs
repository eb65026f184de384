//! Size-adaptive hierarchical chunking with structural metadata.

use serde::{Deserialize, Serialize};
use text_splitter::{ChunkConfig, TextSplitter};

use common::{error::AppError, storage::types::chunk::ChunkLevel};

/// Characters per token, the estimate used across the pipeline. The
/// embedding service tokenises server-side; these counts only drive chunk
/// sizing and the persisted `token_count`.
const CHARS_PER_TOKEN: usize = 4;

/// Heading annotation from the document reader: byte offset of the heading
/// in the normalised text, its level (1 = document root) and title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeadingAnnotation {
    pub offset: usize,
    pub level: u8,
    pub title: String,
}

/// Word-count policy selecting the chunk size for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// < 800 words: keep the whole context in one chunk.
    VerySmall,
    /// < 2000 words.
    Small,
    /// < 5000 words.
    Medium,
    Large,
}

impl ChunkPolicy {
    pub fn for_word_count(word_count: usize) -> Self {
        if word_count < 800 {
            Self::VerySmall
        } else if word_count < 2000 {
            Self::Small
        } else if word_count < 5000 {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub const fn target_tokens(self) -> usize {
        match self {
            Self::VerySmall => 4000,
            Self::Small => 1500,
            Self::Medium => 800,
            Self::Large => 512,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerySmall => "very_small",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

/// Token targets for hierarchical mode: large context parents split into
/// small retrieval-unit children.
const PARENT_TARGET_TOKENS: usize = 2000;
const CHILD_TARGET_TOKENS: usize = 600;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// A chunk ready for embedding; `parent_index` points into the parent
/// prefix of the output list for child chunks. The byte span locates the
/// chunk in the normalised text so reader artefacts (images) can be
/// attached to the chunk covering them.
#[derive(Debug, Clone)]
pub struct PreparedChunk {
    pub content: String,
    pub token_count: usize,
    pub section_hierarchy: Vec<String>,
    pub heading_context: String,
    pub document_position: f32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub level: ChunkLevel,
    pub parent_index: Option<usize>,
}

impl PreparedChunk {
    pub fn covers(&self, offset: usize) -> bool {
        self.start_offset <= offset && offset < self.end_offset
    }
}

#[derive(Debug)]
pub struct ChunkerOutput {
    /// Parents first (document order), then children (document order).
    pub chunks: Vec<PreparedChunk>,
    pub policy: ChunkPolicy,
    pub parent_count: usize,
    pub word_count: usize,
}

/// Splits a normalised document into chunks carrying index, token count and
/// structural metadata. Empty documents are rejected.
pub fn chunk_document(
    text: &str,
    headings: &[HeadingAnnotation],
    overlap_tokens: usize,
    hierarchical: bool,
) -> Result<ChunkerOutput, AppError> {
    let word_count = text.split_whitespace().count();
    if word_count == 0 {
        return Err(AppError::Validation(
            "document contains no words".to_string(),
        ));
    }

    let policy = ChunkPolicy::for_word_count(word_count);
    let total_len = text.len().max(1);

    if hierarchical {
        chunk_hierarchical(text, headings, overlap_tokens, policy, word_count, total_len)
    } else {
        let pieces = split_text(text, policy.target_tokens(), overlap_tokens)?;
        let chunks = pieces
            .into_iter()
            .map(|(offset, content)| {
                annotate(content, offset, total_len, headings, ChunkLevel::Parent, None)
            })
            .collect::<Vec<_>>();
        let parent_count = chunks.len();

        Ok(ChunkerOutput {
            chunks,
            policy,
            parent_count,
            word_count,
        })
    }
}

fn chunk_hierarchical(
    text: &str,
    headings: &[HeadingAnnotation],
    overlap_tokens: usize,
    policy: ChunkPolicy,
    word_count: usize,
    total_len: usize,
) -> Result<ChunkerOutput, AppError> {
    let parents = split_text(text, PARENT_TARGET_TOKENS, overlap_tokens)?;

    let mut chunks: Vec<PreparedChunk> = parents
        .iter()
        .map(|(offset, content)| {
            annotate(
                content.clone(),
                *offset,
                total_len,
                headings,
                ChunkLevel::Parent,
                None,
            )
        })
        .collect();
    let parent_count = chunks.len();

    for (parent_index, (parent_offset, parent_content)) in parents.iter().enumerate() {
        let children = split_text(parent_content, CHILD_TARGET_TOKENS, overlap_tokens)?;
        for (child_offset, child_content) in children {
            let absolute_offset = parent_offset.saturating_add(child_offset);
            chunks.push(annotate(
                child_content,
                absolute_offset,
                total_len,
                headings,
                ChunkLevel::Child,
                Some(parent_index),
            ));
        }
    }

    Ok(ChunkerOutput {
        chunks,
        policy,
        parent_count,
        word_count,
    })
}

/// Range-capacity split with overlap; capacity and overlap are converted to
/// characters. Overlap is capped below the chunk size, which the splitter
/// requires.
fn split_text(
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<(usize, String)>, AppError> {
    let max_chars = target_tokens.saturating_mul(CHARS_PER_TOKEN).max(1);
    let min_chars = (max_chars.saturating_mul(3) / 4).max(1);
    // The splitter refuses overlaps that approach the chunk size.
    let overlap_chars = overlap_tokens
        .saturating_mul(CHARS_PER_TOKEN)
        .min(min_chars / 2);

    let config = ChunkConfig::new(min_chars..max_chars)
        .with_overlap(overlap_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(config);

    let pieces: Vec<(usize, String)> = splitter
        .chunk_indices(text)
        .map(|(offset, chunk)| (offset, chunk.to_owned()))
        .collect();

    if pieces.is_empty() {
        return Err(AppError::Processing(
            "splitter produced no chunks".to_string(),
        ));
    }

    Ok(pieces)
}

fn annotate(
    content: String,
    offset: usize,
    total_len: usize,
    headings: &[HeadingAnnotation],
    level: ChunkLevel,
    parent_index: Option<usize>,
) -> PreparedChunk {
    let midpoint = offset.saturating_add(content.len() / 2);
    let section_hierarchy = section_path_at(headings, midpoint);
    let heading_context = section_hierarchy.last().cloned().unwrap_or_default();

    #[allow(clippy::cast_precision_loss)]
    let document_position = (midpoint.min(total_len) as f32) / (total_len as f32);

    PreparedChunk {
        token_count: estimate_tokens(&content),
        start_offset: offset,
        end_offset: offset.saturating_add(content.len()),
        content,
        section_hierarchy,
        heading_context,
        document_position,
        level,
        parent_index,
    }
}

/// The stack of headings open at `position`: each new heading pops everything
/// at its level or deeper, so the result reads root-to-leaf.
fn section_path_at(headings: &[HeadingAnnotation], position: usize) -> Vec<String> {
    let mut stack: Vec<(u8, &str)> = Vec::new();

    for heading in headings {
        if heading.offset > position {
            break;
        }
        while stack
            .last()
            .is_some_and(|(level, _)| *level >= heading.level)
        {
            stack.pop();
        }
        stack.push((heading.level, heading.title.as_str()));
    }

    stack.into_iter().map(|(_, title)| title.to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        (0..count)
            .map(|index| format!("mot{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_policy_thresholds() {
        assert_eq!(ChunkPolicy::for_word_count(1), ChunkPolicy::VerySmall);
        assert_eq!(ChunkPolicy::for_word_count(799), ChunkPolicy::VerySmall);
        // Exactly 800 words falls under the small policy, not very_small.
        assert_eq!(ChunkPolicy::for_word_count(800), ChunkPolicy::Small);
        assert_eq!(ChunkPolicy::for_word_count(1999), ChunkPolicy::Small);
        assert_eq!(ChunkPolicy::for_word_count(2000), ChunkPolicy::Medium);
        assert_eq!(ChunkPolicy::for_word_count(4999), ChunkPolicy::Medium);
        assert_eq!(ChunkPolicy::for_word_count(5000), ChunkPolicy::Large);
    }

    #[test]
    fn test_empty_document_rejected() {
        let err = chunk_document("", &[], 400, false).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = chunk_document("   \n\t  ", &[], 400, false).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_small_document_stays_whole() {
        let text = words(300);
        let output = chunk_document(&text, &[], 400, false).unwrap();
        assert_eq!(output.policy, ChunkPolicy::VerySmall);
        assert_eq!(output.chunks.len(), 1);
        assert_eq!(output.chunks[0].level, ChunkLevel::Parent);
        assert!(output.chunks[0].token_count <= 4000);
    }

    #[test]
    fn test_large_document_splits() {
        let text = words(6000);
        let output = chunk_document(&text, &[], 50, false).unwrap();
        assert_eq!(output.policy, ChunkPolicy::Large);
        assert!(output.chunks.len() > 1);
        for chunk in &output.chunks {
            assert!(chunk.token_count <= ChunkPolicy::Large.target_tokens());
        }
    }

    #[test]
    fn test_positions_are_normalised_and_monotonic() {
        let text = words(3000);
        let output = chunk_document(&text, &[], 0, false).unwrap();

        let positions: Vec<f32> = output
            .chunks
            .iter()
            .map(|chunk| chunk.document_position)
            .collect();
        assert!(positions.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(
            positions.windows(2).all(|pair| pair[0] <= pair[1]),
            "positions should grow through the document"
        );
    }

    #[test]
    fn test_re_chunking_is_deterministic() {
        let text = words(2500);
        let first = chunk_document(&text, &[], 100, false).unwrap();
        let second = chunk_document(&text, &[], 100, false).unwrap();
        assert_eq!(first.chunks.len(), second.chunks.len());
        for (a, b) in first.chunks.iter().zip(second.chunks.iter()) {
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn test_hierarchical_children_reference_parents() {
        let text = words(3000);
        let output = chunk_document(&text, &[], 50, true).unwrap();

        assert!(output.parent_count >= 1);
        assert!(output.chunks.len() > output.parent_count);

        for (index, chunk) in output.chunks.iter().enumerate() {
            if index < output.parent_count {
                assert_eq!(chunk.level, ChunkLevel::Parent);
                assert_eq!(chunk.parent_index, None);
            } else {
                assert_eq!(chunk.level, ChunkLevel::Child);
                let parent_index = chunk.parent_index.expect("child without parent index");
                assert!(parent_index < output.parent_count);
            }
        }
    }

    #[test]
    fn test_child_content_is_contained_in_parent() {
        let text = words(3000);
        let output = chunk_document(&text, &[], 0, true).unwrap();

        for chunk in output.chunks.iter().filter(|c| c.level == ChunkLevel::Child) {
            let parent = &output.chunks[chunk.parent_index.unwrap()];
            assert!(
                parent.content.contains(&chunk.content),
                "child text must come from its parent"
            );
        }
    }

    #[test]
    fn test_section_path_tracks_heading_stack() {
        let headings = vec![
            HeadingAnnotation {
                offset: 0,
                level: 1,
                title: "Guide".to_string(),
            },
            HeadingAnnotation {
                offset: 100,
                level: 2,
                title: "Congés".to_string(),
            },
            HeadingAnnotation {
                offset: 500,
                level: 2,
                title: "Télétravail".to_string(),
            },
            HeadingAnnotation {
                offset: 700,
                level: 3,
                title: "Éligibilité".to_string(),
            },
        ];

        assert_eq!(section_path_at(&headings, 50), vec!["Guide"]);
        assert_eq!(section_path_at(&headings, 200), vec!["Guide", "Congés"]);
        assert_eq!(
            section_path_at(&headings, 800),
            vec!["Guide", "Télétravail", "Éligibilité"]
        );
        assert!(section_path_at(&headings[1..], 0).is_empty());
    }

    #[test]
    fn test_chunk_spans_cover_the_document() {
        let text = words(3000);
        let output = chunk_document(&text, &[], 0, false).unwrap();

        assert_eq!(output.chunks[0].start_offset, 0);
        for chunk in &output.chunks {
            assert!(chunk.start_offset < chunk.end_offset);
            assert!(chunk.end_offset <= text.len());
            assert!(chunk.covers(chunk.start_offset));
            assert!(!chunk.covers(chunk.end_offset));
        }
    }

    #[test]
    fn test_heading_context_is_nearest_heading() {
        let text = words(1000);
        let headings = vec![
            HeadingAnnotation {
                offset: 0,
                level: 1,
                title: "Manuel".to_string(),
            },
        ];
        let output = chunk_document(&text, &headings, 400, false).unwrap();
        assert!(output
            .chunks
            .iter()
            .all(|chunk| chunk.heading_context == "Manuel"));
    }

    #[test]
    fn test_token_estimate_tracks_length() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        let long = "x".repeat(4000);
        assert_eq!(estimate_tokens(&long), 1000);
    }
}
