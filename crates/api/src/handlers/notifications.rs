//! Handlers for notification record inspection.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use billcast_db::repositories::NotificationRepo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/notifications/status-summary
///
/// Counts of notification records per status, plus the total. Also lists
/// the channels with a registered handler, so a deployment can verify at
/// a glance that dispatch is wired.
pub async fn status_summary(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let counts = NotificationRepo::status_counts(&state.pool).await?;

    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let by_status: BTreeMap<String, i64> = counts.into_iter().collect();
    let channels: Vec<&str> = state
        .registry
        .list_available()
        .into_iter()
        .map(|c| c.as_str())
        .collect();

    Ok(Json(DataResponse {
        data: serde_json::json!({
            "by_status": by_status,
            "total": total,
            "available_channels": channels,
        }),
    }))
}
