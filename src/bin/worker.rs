use offerforge_pdf_worker::{
    app_state::AppState,
    config::AppConfig,
    db::{self, job_queries},
    error::WorkerError,
    services::{processor, renderer::PdfRenderer, storage::ArtifactStore},
};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const POLL_BATCH_SIZE: i64 = 10;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting PDF render worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = ArtifactStore::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        &config.storage_public_base_url,
    )
    .expect("Failed to initialize artifact storage");

    let renderer = PdfRenderer::new(
        config.chrome_executable.clone(),
        Duration::from_millis(config.render_timeout_ms),
    );

    let state = AppState::new(db_pool, storage, renderer, config.webhook_allowlist.clone());

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_next_batch(&state).await {
            Ok(true) => {
                tracing::debug!("Batch processed, checking for more jobs");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error polling for jobs, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next batch of pending jobs.
/// Returns Ok(true) if any job was picked up, Ok(false) if none were pending.
async fn process_next_batch(state: &AppState) -> Result<bool, sqlx::Error> {
    let pending = job_queries::get_pending_jobs(&state.db, POLL_BATCH_SIZE).await?;
    if pending.is_empty() {
        return Ok(false);
    }

    for job in pending {
        match processor::process_job(state, job.id).await {
            Ok(success) => {
                tracing::info!(
                    job_id = %success.job_id,
                    pdf_url = %success.pdf_url,
                    "Job completed successfully"
                );
            }
            // Another worker (or an HTTP invocation) won the claim between
            // the poll and our attempt; nothing to do.
            Err(WorkerError::Conflict(_)) | Err(WorkerError::NotFound) => {
                tracing::debug!(job_id = %job.id, "Job taken by another invocation, skipping");
            }
            // Terminal failure already recorded on the job row.
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
            }
        }
    }

    Ok(true)
}
