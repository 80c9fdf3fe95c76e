//! Handlers for the `/users/{id}/preferences` resource.
//!
//! These endpoints own the two mutations the dispatch core exposes on
//! user preferences (channel toggling and quiet windows) plus read
//! access; everything else about users lives elsewhere.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use billcast_core::channels::NotificationChannel;
use billcast_core::error::CoreError;
use billcast_core::types::DbId;
use billcast_db::models::UpsertPreference;
use billcast_db::repositories::PreferenceRepo;
use chrono::NaiveTime;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body for PUT .../quiet-window.
#[derive(Debug, Deserialize)]
pub struct QuietWindowRequest {
    pub quiet_start: NaiveTime,
    pub quiet_end: NaiveTime,
}

/// Request body for PUT .../enabled.
#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// Parse and validate the channel path segment.
fn parse_channel(raw: &str) -> Result<NotificationChannel, AppError> {
    raw.parse::<NotificationChannel>().map_err(AppError::Core)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/users/{user_id}/preferences
///
/// List all channel preferences for a user.
pub async fn list_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let prefs = PreferenceRepo::list_for_user(&state.pool, user_id).await?;
    Ok(Json(DataResponse { data: prefs }))
}

/// PUT /api/v1/users/{user_id}/preferences/{channel}
///
/// Create or update the preference for one channel.
pub async fn upsert_preference(
    State(state): State<AppState>,
    Path((user_id, channel)): Path<(DbId, String)>,
    Json(input): Json<UpsertPreference>,
) -> AppResult<impl IntoResponse> {
    let channel = parse_channel(&channel)?;

    let pref = PreferenceRepo::upsert(&state.pool, user_id, channel.as_str(), &input).await?;

    tracing::info!(user_id, %channel, "User preference updated");

    Ok(Json(DataResponse { data: pref }))
}

/// PUT /api/v1/users/{user_id}/preferences/{channel}/enabled
///
/// Enable or disable a channel, creating the preference row if absent.
pub async fn set_enabled(
    State(state): State<AppState>,
    Path((user_id, channel)): Path<(DbId, String)>,
    Json(input): Json<EnabledRequest>,
) -> AppResult<impl IntoResponse> {
    let channel = parse_channel(&channel)?;

    let pref =
        PreferenceRepo::set_enabled(&state.pool, user_id, channel.as_str(), input.enabled).await?;

    tracing::info!(user_id, %channel, enabled = input.enabled, "Channel toggled");

    Ok(Json(DataResponse { data: pref }))
}

/// PUT /api/v1/users/{user_id}/preferences/{channel}/quiet-window
///
/// Set the quiet window for a channel, creating the row if absent.
pub async fn set_quiet_window(
    State(state): State<AppState>,
    Path((user_id, channel)): Path<(DbId, String)>,
    Json(input): Json<QuietWindowRequest>,
) -> AppResult<impl IntoResponse> {
    let channel = parse_channel(&channel)?;

    let pref = PreferenceRepo::set_quiet_window(
        &state.pool,
        user_id,
        channel.as_str(),
        input.quiet_start,
        input.quiet_end,
    )
    .await?;

    tracing::info!(
        user_id,
        %channel,
        quiet_start = %input.quiet_start,
        quiet_end = %input.quiet_end,
        "Quiet window set"
    );

    Ok(Json(DataResponse { data: pref }))
}

/// DELETE /api/v1/users/{user_id}/preferences/{channel}/quiet-window
///
/// Remove the quiet window for a channel. Returns 404 if the user has no
/// preference row for that channel.
pub async fn clear_quiet_window(
    State(state): State<AppState>,
    Path((user_id, channel)): Path<(DbId, String)>,
) -> AppResult<impl IntoResponse> {
    let channel = parse_channel(&channel)?;

    let found = PreferenceRepo::clear_quiet_window(&state.pool, user_id, channel.as_str()).await?;
    if !found {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "UserNotificationPreference",
            id: user_id,
        }));
    }

    tracing::info!(user_id, %channel, "Quiet window removed");

    Ok(StatusCode::NO_CONTENT)
}
