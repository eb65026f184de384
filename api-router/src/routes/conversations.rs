use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::types::{
        conversation::Conversation,
        message::{Message, SourceRef},
    },
};

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthUser};

#[derive(Debug, Deserialize)]
pub struct CreateConversationParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_use_tools")]
    pub use_tools: bool,
    #[serde(default)]
    pub universe_id: Option<Uuid>,
}

const fn default_use_tools() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub title: String,
    pub provider: String,
    pub use_tools: bool,
    pub universe_id: Option<Uuid>,
    pub message_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            provider: conversation.provider,
            use_tools: conversation.use_tools,
            universe_id: conversation.universe_id,
            message_count: conversation.message_count,
            created_at: conversation.created_at,
        }
    }
}

pub async fn create_conversation(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(params): Json<CreateConversationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let title = params
        .title
        .unwrap_or_else(|| "Nouvelle conversation".to_string());
    let provider = params
        .provider
        .unwrap_or_else(|| state.config.llm_provider_label());

    let conversation = Conversation::create(
        state.db.pool(),
        user_id,
        &title,
        &provider,
        params.use_tools,
        params.universe_id,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse::from(conversation)),
    ))
}

#[derive(Debug, Deserialize)]
pub struct NewMessageParams {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            role: message.role.to_string(),
            content: message.content.clone(),
            provider: message.provider.clone(),
            model: message.model.clone(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub user_message: MessageResponse,
    pub assistant_message: MessageResponse,
    pub sources: Vec<SourceRef>,
    pub truncated: bool,
    pub topic_shift_suggested: bool,
}

/// Runs the full RAG turn and returns the assistant answer with its
/// sanitised sources.
pub async fn post_message(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    Json(params): Json<NewMessageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .orchestrator
        .respond(conversation_id, user_id, &params.content)
        .await?;

    Ok(Json(ChatResponse {
        user_message: MessageResponse::from(&outcome.user_message),
        assistant_message: MessageResponse::from(&outcome.assistant_message),
        sources: outcome.sources,
        truncated: outcome.truncated,
        topic_shift_suggested: outcome.topic_shift_suggested,
    }))
}

/// Sources cited by one assistant message.
pub async fn message_sources(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let message = Message::get(state.db.pool(), message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("message {message_id} not found")))?;

    // Ownership check via the conversation.
    Conversation::get_owned(state.db.pool(), message.conversation_id, user_id).await?;

    Ok(Json(message.sources.unwrap_or_default()))
}
