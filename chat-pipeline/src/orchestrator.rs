//! The RAG orchestrator: persists the user turn, builds the contextual
//! prompt, drives the tool-calling loop against the LLM and persists the
//! assistant answer with sanitised sources.

use std::collections::HashSet;

use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage, ChatCompletionTool,
    ChatCompletionToolArgs, ChatCompletionToolType, FunctionObjectArgs,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use common::{
    db::Db,
    error::AppError,
    llm::LlmClient,
    storage::types::{
        conversation::Conversation,
        message::{Message, SourceRef, TokenUsage},
        universe::UserUniverseAccess,
    },
    utils::config::AppConfig,
};
use retrieval_pipeline::{RetrievalEngine, RetrievalOptions, RetrievedChunk};

use crate::context::{ContextBuilder, ConversationContext};
use crate::sources;

/// Hard bound on tool round-trips per turn.
const MAX_TOOL_ITERATIONS: usize = 3;

/// Cumulative token budget for one turn across all loop iterations.
const TOKEN_BUDGET: i32 = 16_000;

const SEARCH_TOOL_NAME: &str = "search_knowledge_base";

/// Explicit states of the tool loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolLoopState {
    AwaitModel,
    AwaitTool,
    Finalised,
    /// Iteration or token bound hit; the partial answer is returned with a
    /// warning flag.
    Aborted,
}

/// The orchestrator's answer for one user turn.
#[derive(Debug)]
pub struct ChatOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
    pub sources: Vec<SourceRef>,
    /// Set when the loop hit its iteration or token bound.
    pub truncated: bool,
    /// Advisory: the message looked off-topic, the UI may offer a new
    /// conversation.
    pub topic_shift_suggested: bool,
}

#[derive(Debug, Deserialize)]
struct SearchToolArgs {
    query: String,
}

#[derive(Clone)]
pub struct RagOrchestrator {
    db: Db,
    llm: LlmClient,
    retrieval: RetrievalEngine,
    context: ContextBuilder,
    reranker_default: bool,
    hierarchical: bool,
    stitch_adjacent: bool,
    answer_k: usize,
}

impl RagOrchestrator {
    pub fn new(
        db: Db,
        llm: LlmClient,
        retrieval: RetrievalEngine,
        context: ContextBuilder,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            llm,
            retrieval,
            context,
            reranker_default: config.reranker_enabled,
            hierarchical: config.use_hierarchical_chunks,
            stitch_adjacent: config.use_adjacent_chunks,
            answer_k: config.reranker_return_k,
        }
    }

    /// Handles one user message end to end. Nothing beyond the user message
    /// is persisted until the loop settles, so a request dropped mid-loop
    /// leaves no partial assistant message behind.
    #[instrument(skip_all, fields(%conversation_id, %user_id))]
    pub async fn respond(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> Result<ChatOutcome, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }

        let conversation = Conversation::get_owned(self.db.pool(), conversation_id, user_id).await?;
        let user_message = Message::create_user(self.db.pool(), conversation.id, text).await?;

        let context = self.context.build(&conversation, text).await?;
        let options = self
            .retrieval_options(&conversation, user_id)
            .await?;

        let (answer, retrieved, usage, truncated) = if conversation.use_tools {
            self.tool_loop(&conversation, &context, text, &options)
                .await?
        } else {
            self.single_pass(&context, &options).await?
        };

        let source_refs: Vec<SourceRef> = retrieved.iter().map(sources::sanitise).collect();

        let assistant_message = Message::create_assistant(
            self.db.pool(),
            conversation.id,
            &answer,
            &source_refs,
            self.llm.provider_name(),
            self.llm.model(),
            usage,
            None,
        )
        .await?;

        Ok(ChatOutcome {
            user_message,
            assistant_message,
            sources: source_refs,
            truncated,
            topic_shift_suggested: context.topic_shift_suggested,
        })
    }

    /// Universe scope: the conversation's binding wins, else the user's
    /// default universe.
    async fn retrieval_options(
        &self,
        conversation: &Conversation,
        user_id: Uuid,
    ) -> Result<RetrievalOptions, AppError> {
        let universe_id = match conversation.universe_id {
            Some(universe) => Some(universe),
            None => UserUniverseAccess::default_for_user(self.db.pool(), user_id).await?,
        };

        Ok(RetrievalOptions {
            k: self.answer_k,
            universe_id,
            hierarchical: self.hierarchical,
            stitch_adjacent: self.stitch_adjacent,
            rerank: conversation.reranking_preference(self.reranker_default),
        })
    }

    /// `use_tools = false`: retrieval runs unconditionally and the passages
    /// are inlined into a single prompt.
    async fn single_pass(
        &self,
        context: &ConversationContext,
        options: &RetrievalOptions,
    ) -> Result<(String, Vec<RetrievedChunk>, TokenUsage, bool), AppError> {
        let retrieved = self
            .retrieval
            .retrieve(&context.retrieval_query, options)
            .await?;

        let user_prompt = format!(
            "Passages retrouvés :\n{}\n\nQuestion :\n{}",
            sources::tool_result_json(&retrieved),
            context.retrieval_query
        );

        let answer = self
            .llm
            .chat_complete(&context.system_prompt, &user_prompt)
            .await?;

        Ok((answer, retrieved, TokenUsage::default(), false))
    }

    async fn tool_loop(
        &self,
        conversation: &Conversation,
        context: &ConversationContext,
        raw_text: &str,
        options: &RetrievalOptions,
    ) -> Result<(String, Vec<RetrievedChunk>, TokenUsage, bool), AppError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessage::from(context.system_prompt.as_str()).into(),
            ChatCompletionRequestUserMessage::from(raw_text).into(),
        ];
        let tools = vec![search_tool()?];

        let mut state = ToolLoopState::AwaitModel;
        let mut retrieved: Vec<RetrievedChunk> = Vec::new();
        let mut seen_chunks: HashSet<Uuid> = HashSet::new();
        let mut usage = TokenUsage::default();
        let mut last_content = String::new();
        let mut iterations = 0usize;

        loop {
            debug_assert_eq!(state, ToolLoopState::AwaitModel);
            let response = self
                .llm
                .chat_complete_with_tools(messages.clone(), tools.clone())
                .await?;

            if let Some(reported) = &response.usage {
                usage.prompt_tokens =
                    usage.prompt_tokens.saturating_add(reported.prompt_tokens as i32);
                usage.completion_tokens = usage
                    .completion_tokens
                    .saturating_add(reported.completion_tokens as i32);
            }

            let choice = response.choices.into_iter().next().ok_or_else(|| {
                AppError::LLMParsing("LLM returned no choices".to_string())
            })?;

            if let Some(content) = &choice.message.content {
                if !content.is_empty() {
                    last_content = content.clone();
                }
            }

            let tool_calls = choice.message.tool_calls.unwrap_or_default();
            if tool_calls.is_empty() {
                state = ToolLoopState::Finalised;
                break;
            }

            iterations += 1;
            if iterations > MAX_TOOL_ITERATIONS
                || usage.prompt_tokens.saturating_add(usage.completion_tokens) > TOKEN_BUDGET
            {
                warn!(
                    conversation_id = %conversation.id,
                    iterations,
                    "tool loop exceeded its bounds, returning partial answer"
                );
                state = ToolLoopState::Aborted;
                break;
            }

            state = ToolLoopState::AwaitTool;
            debug!(state = ?state, calls = tool_calls.len(), "executing tool calls");
            messages.push(assistant_tool_call_message(&tool_calls)?);

            for call in &tool_calls {
                let result_json = if call.function.name == SEARCH_TOOL_NAME {
                    let query = resolve_tool_query(&call.function.arguments, raw_text, context);
                    let chunks = self.retrieval.retrieve(&query, options).await?;
                    for chunk in &chunks {
                        if seen_chunks.insert(chunk.chunk_id) {
                            retrieved.push(chunk.clone());
                        }
                    }
                    sources::tool_result_json(&chunks)
                } else {
                    warn!(tool = %call.function.name, "model called an unknown tool");
                    serde_json::json!({"error": "unknown tool"})
                };

                messages.push(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(result_json.to_string())
                        .tool_call_id(call.id.clone())
                        .build()?
                        .into(),
                );
            }

            state = ToolLoopState::AwaitModel;
        }

        let truncated = state == ToolLoopState::Aborted;
        info!(
            conversation_id = %conversation.id,
            iterations,
            sources = retrieved.len(),
            truncated,
            "tool loop settled"
        );

        Ok((last_content, retrieved, usage, truncated))
    }
}

/// The model searches with its own phrasing when it provides one; terse
/// echoes of the user message fall back to the enriched query.
fn resolve_tool_query(arguments: &str, raw_text: &str, context: &ConversationContext) -> String {
    let parsed: Option<SearchToolArgs> = serde_json::from_str(arguments).ok();
    match parsed {
        Some(args) if !args.query.trim().is_empty() && args.query.trim() != raw_text.trim() => {
            args.query
        }
        _ => context.retrieval_query.clone(),
    }
}

fn search_tool() -> Result<ChatCompletionTool, AppError> {
    let function = FunctionObjectArgs::default()
        .name(SEARCH_TOOL_NAME)
        .description(
            "Recherche les passages pertinents dans la base documentaire interne. \
             Fournis une requête autonome en français.",
        )
        .parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Requête de recherche autonome"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }))
        .build()?;

    Ok(ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()?)
}

fn assistant_tool_call_message(
    tool_calls: &[ChatCompletionMessageToolCall],
) -> Result<ChatCompletionRequestMessage, AppError> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .tool_calls(tool_calls.to_vec())
        .build()?
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(retrieval_query: &str) -> ConversationContext {
        ConversationContext {
            system_prompt: String::new(),
            retrieval_query: retrieval_query.to_string(),
            enriched: true,
            topic: Some("erreur fusappel 6102".to_string()),
            topic_shift_suggested: false,
        }
    }

    #[test]
    fn test_tool_query_prefers_models_own_phrasing() {
        let ctx = context("comment résoudre l'erreur fusappel 6102");
        let query = resolve_tool_query(
            "{\"query\": \"résolution erreur fusappel 6102 procédure\"}",
            "comment la résoudre ?",
            &ctx,
        );
        assert_eq!(query, "résolution erreur fusappel 6102 procédure");
    }

    #[test]
    fn test_tool_query_falls_back_to_enriched_on_echo() {
        let ctx = context("comment résoudre l'erreur fusappel 6102");
        let query = resolve_tool_query(
            "{\"query\": \"comment la résoudre ?\"}",
            "comment la résoudre ?",
            &ctx,
        );
        assert_eq!(query, "comment résoudre l'erreur fusappel 6102");
    }

    #[test]
    fn test_tool_query_falls_back_on_malformed_arguments() {
        let ctx = context("politique télétravail");
        assert_eq!(
            resolve_tool_query("not json", "politique ?", &ctx),
            "politique télétravail"
        );
        assert_eq!(
            resolve_tool_query("{\"query\": \"\"}", "politique ?", &ctx),
            "politique télétravail"
        );
    }

    #[test]
    fn test_search_tool_definition_is_well_formed() {
        let tool = search_tool().expect("tool definition");
        assert_eq!(tool.function.name, SEARCH_TOOL_NAME);
        let parameters = tool.function.parameters.expect("parameters schema");
        assert_eq!(parameters["required"][0], "query");
    }
}
