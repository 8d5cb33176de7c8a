use sqlx::PgPool;
use std::sync::Arc;

use crate::db::usage::UsageStore;
use crate::services::{renderer::PdfRenderer, storage::ArtifactStore};

/// Shared application state passed to all route handlers and the worker loop.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<ArtifactStore>,
    pub usage: Arc<UsageStore>,
    pub renderer: Arc<PdfRenderer>,
    pub http: reqwest::Client,
    pub webhook_allowlist: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        storage: ArtifactStore,
        renderer: PdfRenderer,
        webhook_allowlist: Vec<String>,
    ) -> Self {
        let usage = UsageStore::new(db.clone());
        Self {
            db,
            storage: Arc::new(storage),
            usage: Arc::new(usage),
            renderer: Arc::new(renderer),
            http: reqwest::Client::new(),
            webhook_allowlist: Arc::new(webhook_allowlist),
        }
    }
}
