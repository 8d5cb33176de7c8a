use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a PDF render job.
///
/// Transitions are monotonic: pending → processing → {completed, failed}.
/// The claim update in `db::job_queries` is the only path into `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A PDF render job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub storage_path: String,
    pub offer_id: Uuid,
    pub user_id: Uuid,
    pub callback_url: Option<String>,
    pub download_token: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub pdf_url: Option<String>,
}

/// Structured portion of the job payload written by the enqueueing layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfJobPayload {
    /// HTML document to render; produced by the trusted template pipeline.
    #[serde(default)]
    pub html: Option<String>,

    /// Billing-period hint; authoritative when present even if processing
    /// happens in a later month.
    #[serde(default)]
    pub usage_period_start: Option<String>,

    /// Per-user monthly limit; `None` means unlimited.
    #[serde(default)]
    pub user_limit: Option<i32>,

    #[serde(default)]
    pub device_id: Option<String>,

    /// Per-device monthly limit; only enforced when `device_id` is present.
    #[serde(default)]
    pub device_limit: Option<i32>,

    #[serde(default)]
    pub template_id: Option<String>,

    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}
