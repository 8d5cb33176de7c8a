//! Job orchestrator.
//!
//! Sequences one render job end to end: lookup → payload validation → claim
//! → render → upload → offer update → quota increments → completion →
//! best-effort webhook. The middle of that sequence mutates three
//! independent stores (artifact bucket, offers table, usage counters) with
//! no cross-store transaction, so every mutation is tracked in [`Applied`]
//! and compensated in reverse order when a later step fails.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{job_queries, offer_queries};
use crate::error::WorkerError;
use crate::models::job::{JobStatus, PdfJob, PdfJobPayload};
use crate::models::usage::{CounterKind, CounterOwner};
use crate::services::{dates, html_signature, webhook};

/// Successful processing outcome, echoed back to the caller.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSuccess {
    pub ok: bool,
    pub job_id: Uuid,
    pub offer_id: Uuid,
    pub pdf_url: String,
    pub download_token: String,
}

/// Which mutations have been applied so far; drives the rollback cascade.
#[derive(Debug, Default)]
struct Applied {
    uploaded: bool,
    offer_updated: bool,
    user_incremented: bool,
    device_incremented: bool,
}

/// Process one render job by id.
pub async fn process_job(state: &AppState, job_id: Uuid) -> Result<JobSuccess, WorkerError> {
    let job = job_queries::get_job(&state.db, job_id)
        .await?
        .ok_or(WorkerError::NotFound)?;

    if job.status != JobStatus::Pending {
        return Err(WorkerError::Conflict(format!(
            "job already processed (status: {})",
            job.status
        )));
    }

    let context = format!("pdf-job {}", job.id);

    let payload: PdfJobPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            return Err(fail_job(
                state,
                job.id,
                WorkerError::Validation(format!("{context}: malformed job payload: {e}")),
            )
            .await);
        }
    };

    let html = match payload.html.as_deref() {
        Some(h) => h,
        None => {
            return Err(fail_job(
                state,
                job.id,
                WorkerError::Validation(format!("{context}: payload is missing HTML")),
            )
            .await);
        }
    };

    if let Err(e) = html_signature::assert_signed(html, &context) {
        return Err(fail_job(state, job.id, e).await);
    }

    // Sole mutual-exclusion point: a lost race means another invocation owns
    // this job, so no further action and no state change here.
    if !job_queries::claim_job(&state.db, job.id).await? {
        return Err(WorkerError::Conflict("job claimed by another worker".into()));
    }

    // Payload-declared period is authoritative; the job's creation day (as a
    // UTC calendar day) is only the fallback.
    let fallback = dates::utc_day(job.created_at);
    let period_str = match payload.usage_period_start.as_deref() {
        Some(hint) => dates::normalize(hint.into(), &fallback),
        None => fallback,
    };
    let period: chrono::NaiveDate = match period_str.parse() {
        Ok(p) => p,
        Err(_) => {
            let e = WorkerError::Validation(format!(
                "{context}: invalid billing period '{period_str}'"
            ));
            return Err(fail_job(state, job.id, e).await);
        }
    };

    let mut applied = Applied::default();
    match run_pipeline(state, &job, &payload, html, period, &context, &mut applied).await {
        Ok(success) => {
            metrics::counter!("pdf_jobs_completed").increment(1);

            // Step 13: best-effort webhook, allowlist-guarded.
            if let Some(callback_url) = &job.callback_url {
                if webhook::is_allowed(callback_url, &state.webhook_allowlist) {
                    let notice = webhook::CompletionNotice {
                        job_id: job.id,
                        offer_id: job.offer_id,
                        pdf_url: &success.pdf_url,
                        download_token: &job.download_token,
                    };
                    webhook::notify(&state.http, callback_url, &notice).await;
                } else {
                    tracing::warn!(
                        job_id = %job.id,
                        url = %callback_url,
                        "Callback URL not on allowlist, skipping webhook"
                    );
                }
            }

            Ok(success)
        }
        Err(e) => {
            rollback_applied(state, &job, &payload, period, &applied).await;
            Err(fail_job(state, job.id, e).await)
        }
    }
}

/// Steps 7–12: render, upload, offer update, quota debits, completion.
async fn run_pipeline(
    state: &AppState,
    job: &PdfJob,
    payload: &PdfJobPayload,
    html: &str,
    period: chrono::NaiveDate,
    context: &str,
    applied: &mut Applied,
) -> Result<JobSuccess, WorkerError> {
    let render_start = Instant::now();
    let pdf = state.renderer.render(html, context).await?;
    metrics::histogram!("pdf_render_seconds").record(render_start.elapsed().as_secs_f64());

    tracing::info!(
        job_id = %job.id,
        bytes = pdf.len(),
        render_ms = render_start.elapsed().as_millis() as u64,
        "Render complete, uploading artifact"
    );

    state.storage.upload(&job.storage_path, &pdf).await?;
    applied.uploaded = true;

    // Offer first, quota second: undoing an offer update is cheaper than
    // undoing a quota debit already charged to the user.
    let pdf_url = state.storage.public_url(&job.storage_path);
    offer_queries::set_offer_pdf_url(&state.db, job.offer_id, &pdf_url).await?;
    applied.offer_updated = true;

    let user_owner = CounterOwner::User {
        user_id: job.user_id,
    };
    let outcome = state
        .usage
        .check_and_increment(&user_owner, payload.user_limit, period)
        .await?;
    if !outcome.allowed {
        metrics::counter!("quota_rejections_total", "kind" => "user").increment(1);
        return Err(WorkerError::QuotaExceeded(CounterKind::User));
    }
    applied.user_incremented = true;

    if let (Some(device_id), Some(device_limit)) = (&payload.device_id, payload.device_limit) {
        let device_owner = CounterOwner::Device {
            user_id: job.user_id,
            device_id: device_id.clone(),
        };
        let outcome = state
            .usage
            .check_and_increment(&device_owner, Some(device_limit), period)
            .await?;
        if !outcome.allowed {
            metrics::counter!("quota_rejections_total", "kind" => "device").increment(1);
            return Err(WorkerError::QuotaExceeded(CounterKind::Device));
        }
        applied.device_incremented = true;
    }

    job_queries::complete_success(&state.db, job.id, &pdf_url).await?;

    tracing::info!(job_id = %job.id, pdf_url = %pdf_url, "Job completed");

    Ok(JobSuccess {
        ok: true,
        job_id: job.id,
        offer_id: job.offer_id,
        pdf_url,
        download_token: job.download_token.clone(),
    })
}

/// Compensate applied mutations in reverse application order: device
/// counter, user counter, offer pdf_url, uploaded artifact. Each step logs
/// its own failure and continues; nothing here may mask the original error.
async fn rollback_applied(
    state: &AppState,
    job: &PdfJob,
    payload: &PdfJobPayload,
    period: chrono::NaiveDate,
    applied: &Applied,
) {
    tracing::warn!(job_id = %job.id, ?applied, "Rolling back applied job mutations");

    if applied.device_incremented {
        if let Some(device_id) = &payload.device_id {
            let owner = CounterOwner::Device {
                user_id: job.user_id,
                device_id: device_id.clone(),
            };
            state.usage.rollback(&owner, period).await;
        }
    }

    if applied.user_incremented {
        let owner = CounterOwner::User {
            user_id: job.user_id,
        };
        state.usage.rollback(&owner, period).await;
    }

    if applied.offer_updated {
        if let Err(e) = offer_queries::clear_offer_pdf_url(&state.db, job.offer_id).await {
            tracing::error!(
                job_id = %job.id,
                offer_id = %job.offer_id,
                error = %e,
                "Failed to roll back offer pdf_url"
            );
        }
    }

    if applied.uploaded {
        if let Err(e) = state.storage.remove(&job.storage_path).await {
            tracing::error!(
                job_id = %job.id,
                storage_path = %job.storage_path,
                error = %e,
                "Failed to remove uploaded artifact during rollback"
            );
        }
    }
}

/// Record `error` as the job's terminal failure and hand it back.
async fn fail_job(state: &AppState, job_id: Uuid, error: WorkerError) -> WorkerError {
    metrics::counter!("pdf_jobs_failed").increment(1);
    tracing::error!(job_id = %job_id, error = %error, "Job failed");

    if let Err(e) = job_queries::complete_failure(&state.db, job_id, &error.to_string()).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
    }

    error
}
