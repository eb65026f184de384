//! Client for the cross-encoder reranking service. Failures here are never
//! fatal: the engine falls back to the fused order.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use uuid::Uuid;

use common::{error::AppError, utils::config::AppConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankDocument {
    pub chunk_id: Uuid,
    pub document_title: String,
    pub content: String,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [RerankDocument],
    top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankedDocument {
    #[serde(flatten)]
    pub document: RerankDocument,
    pub rerank_score: f32,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankedDocument>,
    #[serde(default)]
    #[allow(dead_code)]
    processing_time: f64,
}

#[derive(Clone)]
pub struct RerankerClient {
    http: reqwest::Client,
    base_url: String,
}

impl RerankerClient {
    /// Builds a client whenever a reranker URL is configured.
    /// `RERANKER_ENABLED` only sets the per-conversation default, so a
    /// conversation-level override can still reach the service.
    pub fn maybe_from_config(config: &AppConfig) -> Result<Option<Self>, AppError> {
        let Some(base_url) = config.reranker_url.as_ref() else {
            if config.reranker_enabled {
                return Err(AppError::Validation(
                    "RERANKER_ENABLED is set but RERANKER_URL is missing".to_string(),
                ));
            }
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.reranker_timeout_secs))
            .build()?;

        Ok(Some(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }))
    }

    /// Sends the candidate set for joint (query, document) scoring. Retries
    /// are bounded; on exhaustion the caller keeps the pre-rerank order.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[RerankDocument],
        top_k: usize,
    ) -> Result<Vec<RerankedDocument>, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(2);

        let response = Retry::spawn(retry_strategy, || async {
            self.http
                .post(format!("{}/rerank", self.base_url))
                .json(&RerankRequest {
                    query,
                    documents,
                    top_k,
                })
                .send()
                .await?
                .error_for_status()
        })
        .await
        .map_err(|e| AppError::ExternalService(format!("reranker failed: {e}")))?;

        let body: RerankResponse = response.json().await?;
        Ok(body.results)
    }
}
