//! Source sanitisation: what gets persisted with an assistant message and
//! echoed back through the search tool.

use common::storage::types::message::SourceRef;
use retrieval_pipeline::RetrievedChunk;

/// Hard cap on persisted previews. Full chunk content never lands in
/// `sources`.
pub const PREVIEW_MAX_CHARS: usize = 500;

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    preview.push('…');
    preview
}

/// Builds the sanitised citation for one retrieved chunk.
pub fn sanitise(chunk: &RetrievedChunk) -> SourceRef {
    SourceRef {
        chunk_id: chunk.chunk_id,
        document_title: chunk.document_title.clone(),
        similarity: chunk.similarity,
        content_preview: truncate_chars(&chunk.content, PREVIEW_MAX_CHARS),
        page_number: chunk.page_number,
        section_hierarchy: chunk.section_hierarchy.clone(),
    }
}

/// JSON payload fed back to the model after a `search_knowledge_base` call:
/// source, similarity and preview only.
pub fn tool_result_json(chunks: &[RetrievedChunk]) -> serde_json::Value {
    serde_json::json!(chunks
        .iter()
        .map(|chunk| {
            serde_json::json!({
                "source": chunk.document_title,
                "section": chunk.heading_context,
                "similarity": round_score(chunk.similarity),
                "preview": truncate_chars(&chunk.content, PREVIEW_MAX_CHARS),
            })
        })
        .collect::<Vec<_>>())
}

fn round_score(value: f32) -> f64 {
    (f64::from(value) * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::ChunkLevel;
    use uuid::Uuid;

    fn chunk(content: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            document_title: "Guide RH".to_string(),
            chunk_index: 0,
            content: content.to_string(),
            chunk_level: ChunkLevel::Parent,
            heading_context: "Congés".to_string(),
            section_hierarchy: vec!["Guide".to_string(), "Congés".to_string()],
            similarity: 0.8765,
            fused_score: 0.016,
            rerank_score: None,
            page_number: Some(12),
            prev_chunk_id: None,
            next_chunk_id: None,
            prev_preview: None,
            next_preview: None,
        }
    }

    #[test]
    fn test_preview_is_truncated_to_cap() {
        let long = "é".repeat(2000);
        let source = sanitise(&chunk(&long));
        assert_eq!(source.content_preview.chars().count(), PREVIEW_MAX_CHARS);
        assert!(source.content_preview.ends_with('…'));
    }

    #[test]
    fn test_short_content_is_kept_verbatim() {
        let source = sanitise(&chunk("Les RTT se posent via le portail."));
        assert_eq!(source.content_preview, "Les RTT se posent via le portail.");
        assert_eq!(source.section_hierarchy.len(), 2);
    }

    #[test]
    fn test_page_number_is_carried_through() {
        let source = sanitise(&chunk("contenu"));
        assert_eq!(source.page_number, Some(12));
    }

    #[test]
    fn test_tool_result_shape() {
        let json = tool_result_json(&[chunk("contenu")]);
        let first = &json[0];
        assert_eq!(first["source"], "Guide RH");
        assert_eq!(first["preview"], "contenu");
        assert!((first["similarity"].as_f64().unwrap() - 0.877).abs() < 1e-9);
        assert!(first.get("content").is_none());
    }
}
