use std::sync::Arc;

use chat_pipeline::RagOrchestrator;
use common::{db::Db, utils::config::AppConfig, utils::embedding::EmbeddingClient};

#[derive(Clone)]
pub struct ApiState {
    pub db: Db,
    pub config: AppConfig,
    pub orchestrator: Arc<RagOrchestrator>,
    pub embedding: EmbeddingClient,
}

impl ApiState {
    pub fn new(
        db: Db,
        config: AppConfig,
        orchestrator: Arc<RagOrchestrator>,
        embedding: EmbeddingClient,
    ) -> Self {
        Self {
            db,
            config,
            orchestrator,
            embedding,
        }
    }
}
