//! Conversation context: topic tracking, terse-query enrichment and the
//! contextual system prompt that replaces raw history.

use serde::Deserialize;
use tracing::{info, warn};

use common::{
    db::Db,
    error::AppError,
    llm::LlmClient,
    storage::types::{conversation::Conversation, message::Message},
};

use crate::prompts;

/// How many past messages feed the topic and prompt context
/// (5 user/assistant exchanges).
const HISTORY_MESSAGES: usize = 10;

/// Exchanges shown verbatim (previewed) in the system prompt.
const PROMPT_EXCHANGES: usize = 6;

/// A user message at or under this many tokens leans on conversation
/// context and gets enriched.
const ENRICHMENT_TOKEN_THRESHOLD: usize = 5;

/// Openings that signal an implicit reference to the running topic.
const IMPLICIT_MARKERS: &[&str] = &["comment", "pourquoi", "et si", "ça", "la", "le", "les"];

/// Everything the orchestrator needs for one turn.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub system_prompt: String,
    /// What retrieval should search for: the enriched standalone query when
    /// enrichment fired, the raw user message otherwise.
    pub retrieval_query: String,
    pub enriched: bool,
    pub topic: Option<String>,
    /// Advisory only; the UI may suggest starting a new conversation.
    pub topic_shift_suggested: bool,
}

#[derive(Clone)]
pub struct ContextBuilder {
    db: Db,
    llm: LlmClient,
}

#[derive(Debug, Deserialize)]
struct TopicShiftDecision {
    on_topic: bool,
}

impl ContextBuilder {
    pub const fn new(db: Db, llm: LlmClient) -> Self {
        Self { db, llm }
    }

    /// Builds the per-turn context. LLM helper failures degrade (no topic,
    /// no enrichment) instead of failing the user's request.
    pub async fn build(
        &self,
        conversation: &Conversation,
        user_message: &str,
    ) -> Result<ConversationContext, AppError> {
        let history =
            Message::recent_history(self.db.pool(), conversation.id, HISTORY_MESSAGES).await?;
        let cited = Message::cited_sources(self.db.pool(), conversation.id).await?;

        let mut topic = conversation.current_topic.clone();
        let mut topic_shift_suggested = false;

        if let Some(current) = topic.clone() {
            if self.detect_topic_shift(&current, user_message).await {
                topic_shift_suggested = true;
                topic = self.extract_topic(&history).await;
                Conversation::set_topic(self.db.pool(), conversation.id, topic.as_deref())
                    .await?;
            }
        } else if !history.is_empty() {
            topic = self.extract_topic(&history).await;
            if topic.is_some() {
                Conversation::set_topic(self.db.pool(), conversation.id, topic.as_deref())
                    .await?;
            }
        }

        let (retrieval_query, enriched) = if needs_enrichment(user_message) {
            match &topic {
                Some(topic) => self.enrich_query(topic, user_message).await,
                None => (user_message.to_string(), false),
            }
        } else {
            (user_message.to_string(), false)
        };

        let recent: Vec<Message> = history
            .iter()
            .rev()
            .take(PROMPT_EXCHANGES)
            .rev()
            .cloned()
            .collect();
        let system_prompt = prompts::contextual_system_prompt(topic.as_deref(), &recent, &cited);

        Ok(ConversationContext {
            system_prompt,
            retrieval_query,
            enriched,
            topic,
            topic_shift_suggested,
        })
    }

    /// 3-5 word topic from the history; `None` when the call fails or the
    /// history is empty.
    async fn extract_topic(&self, history: &[Message]) -> Option<String> {
        if history.is_empty() {
            return None;
        }

        let formatted = format_history(history);
        match self
            .llm
            .chat_complete(
                prompts::TOPIC_SYSTEM_PROMPT,
                &prompts::topic_user_prompt(&formatted),
            )
            .await
        {
            Ok(raw) => {
                let topic = raw.trim().trim_end_matches('.').to_string();
                if topic.is_empty() {
                    None
                } else {
                    Some(topic)
                }
            }
            Err(err) => {
                warn!(error = %err, "topic extraction failed");
                None
            }
        }
    }

    async fn detect_topic_shift(&self, topic: &str, user_message: &str) -> bool {
        let outcome = self
            .llm
            .chat_complete_structured(
                prompts::TOPIC_SHIFT_SYSTEM_PROMPT,
                &prompts::topic_shift_user_prompt(topic, user_message),
                "topic_shift",
                prompts::topic_shift_schema(),
            )
            .await;

        match outcome.map(serde_json::from_value::<TopicShiftDecision>) {
            Ok(Ok(decision)) => !decision.on_topic,
            Ok(Err(err)) => {
                warn!(error = %err, "topic shift decision unparseable");
                false
            }
            Err(err) => {
                warn!(error = %err, "topic shift detection failed");
                false
            }
        }
    }

    /// Rewrites a terse follow-up into a standalone query mentioning the
    /// topic. Falls back to the raw message on failure.
    async fn enrich_query(&self, topic: &str, user_message: &str) -> (String, bool) {
        match self
            .llm
            .chat_complete(
                prompts::ENRICHMENT_SYSTEM_PROMPT,
                &prompts::enrichment_user_prompt(topic, user_message),
            )
            .await
        {
            Ok(raw) => {
                let query = raw.trim().to_string();
                if query.is_empty() {
                    (user_message.to_string(), false)
                } else {
                    info!(enriched_query = %query, "query enriched");
                    (query, true)
                }
            }
            Err(err) => {
                warn!(error = %err, "query enrichment failed, using raw query");
                (user_message.to_string(), false)
            }
        }
    }
}

fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(prompts::exchange_preview)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Enrichment fires for terse messages and for implicit references to the
/// running topic.
pub fn needs_enrichment(user_message: &str) -> bool {
    let token_count = user_message.split_whitespace().count();
    if token_count == 0 {
        return false;
    }
    if token_count <= ENRICHMENT_TOKEN_THRESHOLD {
        return true;
    }

    let lowered = user_message.trim_start().to_lowercase();
    IMPLICIT_MARKERS.iter().any(|marker| {
        lowered
            .strip_prefix(marker)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\'', ',', '?']))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terse_messages_need_enrichment() {
        assert!(needs_enrichment("comment la résoudre ?"));
        assert!(needs_enrichment("et ensuite"));
        assert!(needs_enrichment("ça marche pas"));
    }

    #[test]
    fn test_implicit_markers_trigger_even_on_long_messages() {
        assert!(needs_enrichment(
            "comment appliquer cette procédure sur un poste partagé du site de Lyon"
        ));
        assert!(needs_enrichment(
            "la configuration décrite fonctionne-t-elle aussi sur les anciens postes"
        ));
    }

    #[test]
    fn test_standalone_questions_skip_enrichment() {
        assert!(!needs_enrichment(
            "quelle est la procédure de déclaration des incidents de sécurité"
        ));
        assert!(!needs_enrichment(""));
    }

    #[test]
    fn test_marker_must_be_a_word_prefix() {
        // "lesquels" starts with "les" but is its own word; the marker match
        // requires a word boundary.
        assert!(!needs_enrichment(
            "lesquels des formulaires faut-il remplir pour une mutation interne"
        ));
    }
}
