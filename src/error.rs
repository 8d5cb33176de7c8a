use axum::http::StatusCode;

use crate::models::usage::CounterKind;
use crate::services::renderer::RenderError;
use crate::services::storage::StorageError;

/// Errors surfaced by the job orchestrator, mapped onto the worker's
/// HTTP response table.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Bad input (missing HTML, unsigned HTML, malformed request).
    #[error("{0}")]
    Validation(String),

    /// Job already claimed or already processed.
    #[error("{0}")]
    Conflict(String),

    /// Job id does not exist.
    #[error("job not found")]
    NotFound,

    /// Render exceeded the wall-clock budget.
    #[error("PDF render timed out after {0} ms")]
    Timeout(u64),

    /// A usage limit rejected the increment.
    #[error("{}", quota_message(.0))]
    QuotaExceeded(CounterKind),

    #[error(transparent)]
    Render(RenderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Any relational-store failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// User-facing copy for quota rejections, distinct per counter kind.
pub fn quota_message(kind: &CounterKind) -> &'static str {
    match kind {
        CounterKind::User => "Monthly offer limit reached for your account.",
        CounterKind::Device => "Monthly offer limit reached for this device.",
    }
}

impl From<RenderError> for WorkerError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Timeout(ms) => WorkerError::Timeout(ms),
            other => WorkerError::Render(other),
        }
    }
}

impl WorkerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkerError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkerError::Conflict(_) => StatusCode::CONFLICT,
            WorkerError::NotFound => StatusCode::NOT_FOUND,
            WorkerError::Timeout(_)
            | WorkerError::QuotaExceeded(_)
            | WorkerError::Render(_)
            | WorkerError::Storage(_)
            | WorkerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
