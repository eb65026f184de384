#![allow(clippy::missing_docs_in_private_items)]

pub mod chunker;
pub mod pipeline;
pub mod reader;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use common::{db::Db, storage::types::ingestion_job::IngestionJob};
pub use pipeline::IngestionPipeline;

/// Long-lived worker loop: claim the oldest pending job, process it, repeat.
/// Claims go through `FOR UPDATE SKIP LOCKED`, so extra worker instances
/// steal work instead of duplicating it.
pub async fn run_worker_loop(
    db: Db,
    ingestion_pipeline: Arc<IngestionPipeline>,
    poll_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(poll_secs = poll_interval.as_secs(), "ingestion worker started");

    loop {
        match IngestionJob::claim_next_pending(db.pool()).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                info!(%job_id, filename = %job.filename, "claimed ingestion job");
                if let Err(err) = ingestion_pipeline.process_job(job).await {
                    // Already recorded on the job row; the loop keeps going.
                    error!(%job_id, error = %err, "ingestion job failed");
                }
            }
            Ok(None) => {
                sleep(poll_interval).await;
            }
            Err(err) => {
                error!(error = %err, "failed to claim ingestion job, backing off");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
