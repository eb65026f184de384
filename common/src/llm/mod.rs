use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionTool, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use std::time::Duration;

use crate::{
    error::AppError,
    utils::config::{AppConfig, LlmProviderKind},
};

/// Sealed set of chat-completion providers. Both speak the OpenAI-compatible
/// API; the variant pins which deployment a conversation talks to and shows
/// up in persisted assistant messages.
#[derive(Clone)]
pub enum ChatProvider {
    Mistral(Client<OpenAIConfig>),
    Chocolatine(Client<OpenAIConfig>),
}

#[derive(Clone)]
pub struct LlmClient {
    provider: ChatProvider,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn from_config(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_base_url);
        let client = Client::with_config(openai_config);

        let provider = match config.llm_provider {
            LlmProviderKind::Mistral => ChatProvider::Mistral(client),
            LlmProviderKind::Chocolatine => ChatProvider::Chocolatine(client),
        };

        Self {
            provider,
            model: config.llm_model.clone(),
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self.provider {
            ChatProvider::Mistral(_) => "mistral",
            ChatProvider::Chocolatine(_) => "chocolatine",
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> &Client<OpenAIConfig> {
        match &self.provider {
            ChatProvider::Mistral(client) | ChatProvider::Chocolatine(client) => client,
        }
    }

    async fn send(
        &self,
        request: async_openai::types::CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, AppError> {
        let response = tokio::time::timeout(self.timeout, self.client().chat().create(request))
            .await
            .map_err(|_| {
                AppError::ExternalService(format!(
                    "LLM did not answer within {}s",
                    self.timeout.as_secs()
                ))
            })??;
        Ok(response)
    }

    /// Single-turn completion: one system prompt, one user message.
    pub async fn chat_complete(&self, system: &str, user: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system).into(),
                ChatCompletionRequestUserMessage::from(user).into(),
            ])
            .build()?;

        let response = self.send(request).await?;
        extract_content(&response)
    }

    /// Structured completion with a strict JSON schema response format.
    pub async fn chat_complete_structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema_name.to_owned(),
                schema: Some(schema),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(system).into(),
                ChatCompletionRequestUserMessage::from(user).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = self.send(request).await?;
        let content = extract_content(&response)?;

        serde_json::from_str(&content)
            .map_err(|e| AppError::LLMParsing(format!("structured response is not valid JSON: {e}")))
    }

    /// Full-control completion used by the tool loop: the caller owns the
    /// message list and reads tool calls off the raw response.
    pub async fn chat_complete_with_tools(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<CreateChatCompletionResponse, AppError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(messages);
        if !tools.is_empty() {
            builder.tools(tools);
        }
        let request = builder.build()?;

        self.send(request).await
    }
}

fn extract_content(response: &CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))
}
