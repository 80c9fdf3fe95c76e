//! Policy introspection: evaluate the send-time resolver on demand.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use billcast_core::channels::NotificationChannel;
use billcast_core::policy;
use billcast_core::types::DbId;
use billcast_db::repositories::PreferenceRepo;
use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for GET /policy/check.
#[derive(Debug, Deserialize)]
pub struct PolicyCheckQuery {
    pub user_id: DbId,
    pub channel: String,
    /// Time of day to evaluate (`HH:MM`). Defaults to now (UTC).
    pub at: Option<String>,
}

/// Response body for GET /policy/check.
#[derive(Debug, Serialize)]
pub struct PolicyCheckResponse {
    pub user_id: DbId,
    pub channel: String,
    pub checked_at: String,
    pub blocked: bool,
    pub reason: &'static str,
    pub source: &'static str,
    pub quiet_start: Option<NaiveTime>,
    pub quiet_end: Option<NaiveTime>,
}

/// GET /api/v1/policy/check
///
/// Run the send-time resolver for a user/channel at a given time of day,
/// without dispatching anything. Useful for verifying quiet-window
/// configuration.
pub async fn check_policy(
    State(state): State<AppState>,
    Query(params): Query<PolicyCheckQuery>,
) -> AppResult<impl IntoResponse> {
    let channel: NotificationChannel = params.channel.parse().map_err(AppError::Core)?;

    let at = match &params.at {
        Some(raw) => NaiveTime::parse_from_str(raw, "%H:%M")
            .map_err(|e| AppError::BadRequest(format!("Invalid time \"{raw}\": {e}")))?,
        None => Utc::now().time(),
    };

    let pref =
        PreferenceRepo::get_for_channel(&state.pool, params.user_id, channel.as_str()).await?;
    let snapshot = pref.map(|p| p.snapshot());

    let decision = policy::resolve(snapshot.as_ref(), &state.system_window, at);

    let resp = PolicyCheckResponse {
        user_id: params.user_id,
        channel: channel.as_str().to_string(),
        checked_at: at.format("%H:%M").to_string(),
        blocked: decision.blocked,
        reason: decision.reason.as_str(),
        source: decision.source.as_str(),
        quiet_start: decision.window.map(|w| w.start),
        quiet_end: decision.window.map(|w| w.end),
    };

    Ok(Json(DataResponse { data: resp }))
}
