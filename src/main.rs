mod app_state;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{renderer::PdfRenderer, storage::ArtifactStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing offerforge-pdf-worker server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!("pdf_render_seconds", "Time to render one offer PDF");
    metrics::describe_counter!("pdf_jobs_completed", "Total render jobs completed");
    metrics::describe_counter!("pdf_jobs_failed", "Total render jobs that failed");
    metrics::describe_counter!(
        "quota_rejections_total",
        "Increments rejected by a usage limit, by counter kind"
    );
    metrics::describe_counter!(
        "usage_increment_fallback_total",
        "Usage increments that went through the degraded non-atomic path"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize artifact storage client
    tracing::info!("Initializing artifact storage client");
    let storage = ArtifactStore::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        &config.storage_public_base_url,
    )
    .expect("Failed to initialize artifact storage");

    // Initialize the headless-browser renderer
    tracing::info!(timeout_ms = config.render_timeout_ms, "Initializing PDF renderer");
    let renderer = PdfRenderer::new(
        config.chrome_executable.clone(),
        Duration::from_millis(config.render_timeout_ms),
    );

    // Create shared application state
    let state = AppState::new(db_pool, storage, renderer, config.webhook_allowlist.clone());

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs/process", post(routes::process::process_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024)); // 2 MB limit

    tracing::info!("Starting offerforge-pdf-worker on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
