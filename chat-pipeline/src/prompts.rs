//! French prompt templates and response schemas for the conversational
//! layer.

use common::storage::types::message::{Message, SourceRef};

/// Base system prompt. Each turn gets a fresh single-message prompt with
/// injected context instead of raw history, which keeps the model calling
/// the search tool reliably.
pub const BASE_SYSTEM_PROMPT: &str = "Tu es un assistant documentaire pour des documents \
techniques et administratifs internes en français. Pour CHAQUE question, tu dois d'abord \
interroger la base documentaire avec l'outil search_knowledge_base, puis répondre \
uniquement à partir des passages retrouvés. Cite les documents utilisés. Si les passages \
ne couvrent pas la question, dis-le explicitement au lieu d'inventer.";

pub const TOPIC_SYSTEM_PROMPT: &str = "Tu résumes le sujet d'une conversation en 3 à 5 mots \
en français. Réponds uniquement par le sujet, sans ponctuation finale.";

pub const ENRICHMENT_SYSTEM_PROMPT: &str = "Tu réécris une question elliptique en une \
question autonome et précise, en français, en t'appuyant sur le sujet de la conversation. \
Garde tous les termes techniques, codes et acronymes tels quels. Réponds uniquement par la \
question réécrite.";

pub const TOPIC_SHIFT_SYSTEM_PROMPT: &str = "Tu décides si un nouveau message continue le \
sujet d'une conversation ou ouvre un sujet différent.";

/// Schema for the topic-shift decision.
pub fn topic_shift_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "on_topic": {
                "type": "boolean",
                "description": "true si le message reste dans le sujet courant"
            }
        },
        "required": ["on_topic"],
        "additionalProperties": false
    })
}

pub fn topic_user_prompt(history: &str) -> String {
    format!("Historique de la conversation :\n{history}\n\nSujet (3 à 5 mots) :")
}

pub fn enrichment_user_prompt(topic: &str, query: &str) -> String {
    format!(
        "Sujet de la conversation : {topic}\n\nQuestion elliptique : {query}\n\n\
         Question autonome :"
    )
}

pub fn topic_shift_user_prompt(topic: &str, message: &str) -> String {
    format!("Sujet courant : {topic}\n\nNouveau message : {message}")
}

/// Compact preview of one past exchange for the contextual system prompt.
pub fn exchange_preview(message: &Message) -> String {
    const PREVIEW_CHARS: usize = 200;
    let preview: String = message.content.chars().take(PREVIEW_CHARS).collect();
    let ellipsis = if message.content.chars().count() > PREVIEW_CHARS {
        "…"
    } else {
        ""
    };
    format!("[{}] {preview}{ellipsis}", message.role)
}

/// Assembles the contextual system prompt: base template, current topic,
/// the last exchanges and the documents already cited.
pub fn contextual_system_prompt(
    topic: Option<&str>,
    recent: &[Message],
    cited: &[SourceRef],
) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);

    if let Some(topic) = topic {
        prompt.push_str("\n\nSujet courant de la conversation : ");
        prompt.push_str(topic);
    }

    if !recent.is_empty() {
        prompt.push_str("\n\nDerniers échanges :");
        for message in recent {
            prompt.push('\n');
            prompt.push_str(&exchange_preview(message));
        }
    }

    if !cited.is_empty() {
        let mut titles: Vec<&str> = cited
            .iter()
            .map(|source| source.document_title.as_str())
            .collect();
        titles.sort_unstable();
        titles.dedup();

        prompt.push_str("\n\nDocuments déjà cités : ");
        prompt.push_str(&titles.join(", "));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::message::MessageRole;
    use uuid::Uuid;

    fn message(role: MessageRole, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            sources: None,
            provider: None,
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            parent_message_id: None,
            created_at: Utc::now(),
        }
    }

    fn source(title: &str) -> SourceRef {
        SourceRef {
            chunk_id: Uuid::new_v4(),
            document_title: title.to_string(),
            similarity: 0.8,
            content_preview: String::new(),
            page_number: None,
            section_hierarchy: Vec::new(),
        }
    }

    #[test]
    fn test_contextual_prompt_contains_topic_and_citations() {
        let recent = vec![
            message(MessageRole::User, "Comment poser un RTT ?"),
            message(MessageRole::Assistant, "Via le portail RH, onglet absences."),
        ];
        let cited = vec![source("Guide RH"), source("Guide RH"), source("Annexe RTT")];

        let prompt = contextual_system_prompt(Some("congés RTT"), &recent, &cited);

        assert!(prompt.starts_with(BASE_SYSTEM_PROMPT));
        assert!(prompt.contains("Sujet courant de la conversation : congés RTT"));
        assert!(prompt.contains("[user] Comment poser un RTT ?"));
        // Titles are deduplicated.
        assert_eq!(prompt.matches("Guide RH").count(), 1);
        assert!(prompt.contains("Annexe RTT"));
    }

    #[test]
    fn test_contextual_prompt_without_context_is_base() {
        let prompt = contextual_system_prompt(None, &[], &[]);
        assert_eq!(prompt, BASE_SYSTEM_PROMPT);
    }

    #[test]
    fn test_exchange_preview_truncates_long_messages() {
        let long = "x".repeat(500);
        let preview = exchange_preview(&message(MessageRole::Assistant, &long));
        assert!(preview.chars().count() < 220);
        assert!(preview.ends_with('…'));
    }
}
