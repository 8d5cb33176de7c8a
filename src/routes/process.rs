use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::services::processor;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub job_id: Option<String>,
}

/// POST /api/v1/jobs/process — run one render job to completion.
///
/// Body: `{ "jobId": "<uuid>" }`. Responses follow the worker's status
/// table: 400 for bad input, 404 unknown job, 409 already processed or
/// claim lost, 500 for downstream failures (after rollback), 200 on success.
pub async fn process_job(
    State(state): State<AppState>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {e}"));
        }
    };

    let job_id = match request.job_id.as_deref() {
        None => return error_response(StatusCode::BAD_REQUEST, "missing jobId"),
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) => id,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "jobId is not a valid UUID"),
        },
    };

    match processor::process_job(&state, job_id).await {
        Ok(success) => (StatusCode::OK, Json(success)).into_response(),
        Err(e) => error_response(e.status_code(), &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
