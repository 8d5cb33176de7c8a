use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobStatus, PdfJob};

const JOB_COLUMNS: &str = "id, status, payload, storage_path, offer_id, user_id, callback_url, \
                           download_token, created_at, started_at, completed_at, error_message, pdf_url";

fn job_from_row(row: &PgRow) -> Result<PdfJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    // A status outside the state machine is data corruption, not a default.
    let status = JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".into(),
        source: Box::new(e),
    })?;

    Ok(PdfJob {
        id: row.try_get("id")?,
        status,
        payload: row.try_get("payload")?,
        storage_path: row.try_get("storage_path")?,
        offer_id: row.try_get("offer_id")?,
        user_id: row.try_get("user_id")?,
        callback_url: row.try_get("callback_url")?,
        download_token: row.try_get("download_token")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        pdf_url: row.try_get("pdf_url")?,
    })
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<PdfJob>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM pdf_jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Claim a pending job for processing.
///
/// Single conditional write: the update only matches while the stored status
/// is still `pending`, which closes the race between two invocations of the
/// worker targeting the same job id. Returns whether this caller won.
pub async fn claim_job(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pdf_jobs
        SET status = 'processing', started_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a job completed with its final PDF URL.
pub async fn complete_success(
    pool: &PgPool,
    job_id: Uuid,
    pdf_url: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE pdf_jobs
        SET status = 'completed', completed_at = NOW(), pdf_url = $2, error_message = NULL
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(pdf_url)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a job failed with its terminal error message.
///
/// Callable even when the job was never claimed (validation failures happen
/// before the claim); the failure is still recorded for observability.
pub async fn complete_failure(
    pool: &PgPool,
    job_id: Uuid,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE pdf_jobs
        SET status = 'failed', completed_at = NOW(), error_message = $2
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get pending jobs (for the polling worker)
pub async fn get_pending_jobs(pool: &PgPool, limit: i64) -> Result<Vec<PdfJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM pdf_jobs WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}
