//! Handlers for the retry subsystem.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use billcast_db::repositories::NotificationRepo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/retry/run
///
/// Run one retry rescan pass immediately, independent of the periodic
/// schedule. Returns the number of notifications re-sent.
pub async fn run_retry(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let resent = state.retry.scan_once().await?;

    tracing::info!(resent, "Manual retry scan completed");

    Ok(Json(DataResponse {
        data: serde_json::json!({ "resent": resent }),
    }))
}

/// GET /api/v1/retry/failed-count
///
/// Count FAILED notifications that the rescan is still allowed to retry.
pub async fn failed_count(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let count = NotificationRepo::failed_retriable_count(&state.pool, state.max_retries).await?;

    Ok(Json(DataResponse {
        data: serde_json::json!({ "failed_retriable": count }),
    }))
}
