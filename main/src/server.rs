use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use chat_pipeline::{ContextBuilder, RagOrchestrator};
use common::{
    db::Db,
    llm::LlmClient,
    utils::{config::get_config, embedding::EmbeddingClient},
};
use retrieval_pipeline::{RerankerClient, RetrievalEngine};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Db::connect(&config.database_url).await?;

    // A migration failure must abort the boot, not limp along on a drifted
    // schema.
    db.apply_migrations().await?;

    let embedding = EmbeddingClient::from_config(&config)?;
    let reranker = RerankerClient::maybe_from_config(&config)?;
    let llm = LlmClient::from_config(&config);

    let retrieval = RetrievalEngine::from_config(db.clone(), embedding.clone(), reranker, &config)?;
    let context = ContextBuilder::new(db.clone(), llm.clone());
    let orchestrator = Arc::new(RagOrchestrator::new(
        db.clone(),
        llm,
        retrieval,
        context,
        &config,
    ));

    let api_state = ApiState::new(db, config.clone(), orchestrator, embedding);

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
