//! API route definitions.

use crate::api::AppState;
use crate::scan::{ScanError, ScanRequest, ScanType};
use crate::storage;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/scans/{subject}", post(trigger_scan))
        .route("/scans/{subject}/latest", get(latest_scan))
        .route("/scans/{subject}/history", get(scan_history))
        .route("/scans/{subject}/progress", get(scan_progress))
        .route("/schedules", get(list_schedules))
}

type ApiError = (StatusCode, Json<Value>);

fn scan_error_response(err: &ScanError) -> ApiError {
    let status = match err {
        ScanError::InProgress(_) => StatusCode::CONFLICT,
        ScanError::Cooldown { .. } | ScanError::Busy => StatusCode::TOO_MANY_REQUESTS,
        ScanError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
        ScanError::Configuration(_) | ScanError::Invariant(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(json!({ "error": err.code(), "message": err.to_string() })),
    )
}

fn internal_error(err: anyhow::Error) -> ApiError {
    tracing::error!("API internal error: {:#}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "INTERNAL", "message": "internal error" })),
    )
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn health() -> Json<Value> {
    envelope(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TriggerBody {
    scan_type: Option<ScanType>,
    sources: Vec<String>,
}

async fn trigger_scan(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Json(body): Json<TriggerBody>,
) -> Result<Json<Value>, ApiError> {
    let mut request = ScanRequest::new(subject, body.scan_type.unwrap_or(ScanType::Comprehensive));
    request.sources = body.sources;

    let result = state
        .orchestrator
        .request_scan(request)
        .await
        .map_err(|e| scan_error_response(&e))?;

    if let Err(e) = storage::save_scan_result(&state.pool, &result) {
        // The caller still gets the result; history just has a gap.
        tracing::error!(subject = %result.subject_id, "Failed to persist scan result: {:#}", e);
    }

    Ok(envelope(
        serde_json::to_value(&result).map_err(|e| internal_error(e.into()))?,
    ))
}

async fn latest_scan(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match storage::latest_scan(&state.pool, &subject).map_err(internal_error)? {
        Some(result) => Ok(envelope(
            serde_json::to_value(&result).map_err(|e| internal_error(e.into()))?,
        )),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "NOT_FOUND", "message": "no scans recorded for subject" })),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn scan_history(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(20).min(100);
    let history = storage::scan_history(&state.pool, &subject, limit).map_err(internal_error)?;
    let total = history.len();
    Ok(envelope(json!({
        "scans": history,
        "total": total
    })))
}

async fn scan_progress(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.orchestrator.has_subject(&subject) {
        let err = ScanError::SubjectNotFound(subject);
        return Err(scan_error_response(&err));
    }
    let progress = state.orchestrator.progress(&subject);
    Ok(envelope(json!({
        "running": state.orchestrator.is_running(&subject),
        "progress": progress
    })))
}

async fn list_schedules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let schedules = state.scheduler.list().await.map_err(internal_error)?;
    let total = schedules.len();
    Ok(envelope(json!({
        "schedules": schedules,
        "total": total
    })))
}
