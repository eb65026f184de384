use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Role marker the embedding model expects in front of each input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingInputType {
    Query,
    Passage,
}

impl EmbeddingInputType {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Query => "query: ",
            Self::Passage => "passage: ",
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: Vec<String>,
    input_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP client for the black-box embedding service
/// (`POST /embed` `{texts, input_type}` -> `{embeddings}`).
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    dimension: usize,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.embedding_service_url.trim_end_matches('/').to_owned(),
            dimension: config.embedding_dimension,
            batch_size: config.embedding_batch_size.max(1),
        })
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds corpus passages for ingestion, batched up to the configured
    /// size, preserving input order.
    pub async fn embed_passages(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_embeddings = self.embed_batch(batch, EmbeddingInputType::Passage).await?;
            embeddings.extend(batch_embeddings);
        }
        Ok(embeddings)
    }

    /// Embeds a retrieval query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let texts = [text.to_owned()];
        let mut embeddings = self.embed_batch(&texts, EmbeddingInputType::Query).await?;
        embeddings.pop().ok_or_else(|| {
            AppError::ExternalService("embedding service returned no vector".to_string())
        })
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: EmbeddingInputType,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let prefixed: Vec<String> = texts
            .iter()
            .map(|text| format!("{}{}", input_type.prefix(), text))
            .collect();

        let retry_strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);
        let response = Retry::spawn(retry_strategy, || async {
            self.http
                .post(format!("{}/embed", self.base_url))
                .json(&EmbedRequest {
                    texts: prefixed.clone(),
                    input_type: match input_type {
                        EmbeddingInputType::Query => "query",
                        EmbeddingInputType::Passage => "passage",
                    },
                })
                .send()
                .await?
                .error_for_status()
        })
        .await
        .map_err(|e| AppError::ExternalService(format!("embedding service failed: {e}")))?;

        let body: EmbedResponse = response.json().await?;

        if body.embeddings.len() != texts.len() {
            return Err(AppError::Integrity(format!(
                "embedding service returned {} vectors for {} inputs",
                body.embeddings.len(),
                texts.len()
            )));
        }

        for embedding in &body.embeddings {
            if embedding.len() != self.dimension {
                return Err(AppError::Integrity(format!(
                    "embedding dimension {} does not match the configured {}",
                    embedding.len(),
                    self.dimension
                )));
            }
        }

        debug!(
            batch = texts.len(),
            input_type = ?input_type,
            "embedded batch"
        );

        Ok(body.embeddings)
    }

    /// Health probe used by the readiness endpoint.
    pub async fn healthy(&self) -> bool {
        self.http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_prefixes() {
        assert_eq!(EmbeddingInputType::Query.prefix(), "query: ");
        assert_eq!(EmbeddingInputType::Passage.prefix(), "passage: ");
    }
}
