//! Repository for the `user_notification_prefs` table.

use billcast_core::types::DbId;
use chrono::NaiveTime;
use sqlx::PgPool;

use crate::models::notification::{UpsertPreference, UserNotificationPreference};

/// Column list for `user_notification_prefs` queries.
const COLUMNS: &str = "\
    id, user_id, channel, enabled, priority, quiet_start, quiet_end, \
    created_at, updated_at";

/// Provides CRUD operations for user notification preferences.
pub struct PreferenceRepo;

impl PreferenceRepo {
    /// List all channel preferences for a user.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<UserNotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_notification_prefs \
             WHERE user_id = $1 \
             ORDER BY channel"
        );
        sqlx::query_as::<_, UserNotificationPreference>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Get the preference for a specific channel, if one exists.
    pub async fn get_for_channel(
        pool: &PgPool,
        user_id: DbId,
        channel: &str,
    ) -> Result<Option<UserNotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_notification_prefs \
             WHERE user_id = $1 AND channel = $2"
        );
        sqlx::query_as::<_, UserNotificationPreference>(&query)
            .bind(user_id)
            .bind(channel)
            .fetch_optional(pool)
            .await
    }

    /// Insert or update a preference in a single round-trip.
    ///
    /// `COALESCE` keeps existing values for fields the caller left unset;
    /// the quiet window bounds are overwritten as a pair so a request can
    /// both set and clear them.
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        channel: &str,
        input: &UpsertPreference,
    ) -> Result<UserNotificationPreference, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_notification_prefs \
                (user_id, channel, enabled, priority, quiet_start, quiet_end) \
             VALUES ($1, $2, COALESCE($3, true), COALESCE($4, 1), $5, $6) \
             ON CONFLICT (user_id, channel) DO UPDATE SET \
                enabled = COALESCE($3, user_notification_prefs.enabled), \
                priority = COALESCE($4, user_notification_prefs.priority), \
                quiet_start = $5, \
                quiet_end = $6, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserNotificationPreference>(&query)
            .bind(user_id)
            .bind(channel)
            .bind(input.enabled)
            .bind(input.priority)
            .bind(input.quiet_start)
            .bind(input.quiet_end)
            .fetch_one(pool)
            .await
    }

    /// Enable or disable a channel, creating the row if absent.
    pub async fn set_enabled(
        pool: &PgPool,
        user_id: DbId,
        channel: &str,
        enabled: bool,
    ) -> Result<UserNotificationPreference, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_notification_prefs (user_id, channel, enabled) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, channel) DO UPDATE SET \
                enabled = EXCLUDED.enabled, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserNotificationPreference>(&query)
            .bind(user_id)
            .bind(channel)
            .bind(enabled)
            .fetch_one(pool)
            .await
    }

    /// Set the quiet window for a channel, creating the row if absent.
    pub async fn set_quiet_window(
        pool: &PgPool,
        user_id: DbId,
        channel: &str,
        quiet_start: NaiveTime,
        quiet_end: NaiveTime,
    ) -> Result<UserNotificationPreference, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_notification_prefs (user_id, channel, quiet_start, quiet_end) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, channel) DO UPDATE SET \
                quiet_start = EXCLUDED.quiet_start, \
                quiet_end = EXCLUDED.quiet_end, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserNotificationPreference>(&query)
            .bind(user_id)
            .bind(channel)
            .bind(quiet_start)
            .bind(quiet_end)
            .fetch_one(pool)
            .await
    }

    /// Remove the quiet window for a channel.
    ///
    /// Returns `true` when a row existed and was updated.
    pub async fn clear_quiet_window(
        pool: &PgPool,
        user_id: DbId,
        channel: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_notification_prefs \
             SET quiet_start = NULL, quiet_end = NULL, updated_at = NOW() \
             WHERE user_id = $1 AND channel = $2",
        )
        .bind(user_id)
        .bind(channel)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
