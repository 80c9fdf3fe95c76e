//! Route table for the administrative API.

use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::handlers::{notifications, policy, preferences, queue, retry};
use crate::state::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/queue",
            get(queue::get_queue_status).delete(queue::clear_queue),
        )
        .route("/retry/run", post(retry::run_retry))
        .route("/retry/failed-count", get(retry::failed_count))
        .route(
            "/notifications/status-summary",
            get(notifications::status_summary),
        )
        .route(
            "/users/{user_id}/preferences",
            get(preferences::list_preferences),
        )
        .route(
            "/users/{user_id}/preferences/{channel}",
            put(preferences::upsert_preference),
        )
        .route(
            "/users/{user_id}/preferences/{channel}/enabled",
            put(preferences::set_enabled),
        )
        .route(
            "/users/{user_id}/preferences/{channel}/quiet-window",
            put(preferences::set_quiet_window).delete(preferences::clear_quiet_window),
        )
        .route("/policy/check", get(policy::check_policy))
}

/// Root-level health check.
pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
