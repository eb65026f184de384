use std::sync::Arc;
use std::time::Duration;

use common::{
    db::Db,
    llm::LlmClient,
    utils::{config::get_config, embedding::EmbeddingClient},
};
use ingestion_pipeline::{reader::DocumentReader, run_worker_loop, IngestionPipeline};
use quality_pipeline::{QualityScheduler, ThumbsDownAnalyser};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Db::connect(&config.database_url).await?;
    db.apply_migrations().await?;

    let embedding = EmbeddingClient::from_config(&config)?;
    let reader = DocumentReader::from_config(&config)?;
    let llm = LlmClient::from_config(&config);

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        reader,
        embedding,
        &config,
    ));
    let analyser = ThumbsDownAnalyser::new(db.clone(), llm.clone(), &config);
    let scheduler = QualityScheduler::new(db.clone(), llm, &config)?;

    let poll_interval = Duration::from_secs(config.ingestion_poll_interval_secs);

    // Three long-lived roles in one process: the ingestion worker, the
    // thumbs-down analyser and the quality scheduler. Each catches and logs
    // its own errors; if one of them returns, the process exits non-zero.
    tokio::select! {
        outcome = run_worker_loop(db, ingestion_pipeline, poll_interval) => {
            error!("ingestion worker loop exited");
            outcome?;
        }
        outcome = analyser.run() => {
            error!("thumbs-down analyser exited");
            outcome?;
        }
        outcome = scheduler.run() => {
            error!("quality scheduler exited");
            outcome?;
        }
    }

    Ok(())
}
