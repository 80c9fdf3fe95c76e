//! Handlers for waiting-queue inspection and management.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// How many ready payloads to preview in the status response.
const PREVIEW_LIMIT: usize = 10;

/// Response for GET /queue.
#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    /// Total deferred entries.
    pub size: u64,
    /// Entries whose release time has already passed.
    pub ready_count: usize,
    /// Up to ten ready payloads, for inspection.
    pub ready_preview: Vec<String>,
}

/// GET /api/v1/queue
///
/// Returns the waiting queue's size and a preview of released entries.
pub async fn get_queue_status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let size = state.queue.len().await?;
    let ready_preview = state.queue.drain_ready(PREVIEW_LIMIT).await?;

    let resp = QueueStatusResponse {
        size,
        ready_count: ready_preview.len(),
        ready_preview,
    };

    Ok(Json(DataResponse { data: resp }))
}

/// DELETE /api/v1/queue
///
/// Drop every deferred entry. Operational escape hatch.
pub async fn clear_queue(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.queue.clear().await?;

    tracing::info!("Waiting queue cleared via admin API");

    Ok(Json(DataResponse {
        data: serde_json::json!({ "cleared": true }),
    }))
}
