//! Notification entity models and DTOs.

use billcast_core::policy::{PreferenceSnapshot, QuietWindow};
use billcast_core::types::{DbId, Timestamp};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::status::NotificationStatus;

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationRecord {
    pub id: DbId,
    pub user_id: DbId,
    pub bill_id: DbId,
    pub notification_type: String,
    pub status: String,
    pub recipient: String,
    pub content: String,
    pub retry_count: i32,
    pub scheduled_at: Timestamp,
    pub sent_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
}

impl NotificationRecord {
    /// The parsed status, `None` if the column holds an unknown value.
    pub fn status(&self) -> Option<NotificationStatus> {
        NotificationStatus::parse(&self.status)
    }
}

/// Input for the bulk upsert: one processing outcome for one message.
///
/// Identity is `(bill_id, notification_type)`; the upsert keeps the
/// existing row's `created_at` and bumps `retry_count` when the incoming
/// status is FAILED.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: DbId,
    pub bill_id: DbId,
    pub notification_type: String,
    pub status: NotificationStatus,
    pub recipient: String,
    pub content: String,
    pub scheduled_at: Timestamp,
    pub sent_at: Option<Timestamp>,
    pub error_message: Option<String>,
}

/// A row from the `user_notification_prefs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserNotificationPreference {
    pub id: DbId,
    pub user_id: DbId,
    pub channel: String,
    pub enabled: bool,
    pub priority: i32,
    pub quiet_start: Option<NaiveTime>,
    pub quiet_end: Option<NaiveTime>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserNotificationPreference {
    /// The read-only view the policy resolver consumes.
    ///
    /// A half-configured window (only one bound set) counts as no window.
    pub fn snapshot(&self) -> PreferenceSnapshot {
        let window = match (self.quiet_start, self.quiet_end) {
            (Some(start), Some(end)) => Some(QuietWindow::new(start, end)),
            _ => None,
        };
        PreferenceSnapshot {
            enabled: self.enabled,
            window,
        }
    }
}

/// DTO for creating or updating a preference via the admin surface.
#[derive(Debug, Deserialize)]
pub struct UpsertPreference {
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub quiet_start: Option<NaiveTime>,
    pub quiet_end: Option<NaiveTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pref(
        enabled: bool,
        quiet_start: Option<NaiveTime>,
        quiet_end: Option<NaiveTime>,
    ) -> UserNotificationPreference {
        UserNotificationPreference {
            id: 1,
            user_id: 7,
            channel: "EMAIL".to_string(),
            enabled,
            priority: 1,
            quiet_start,
            quiet_end,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn snapshot_with_full_window() {
        let start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let snap = pref(true, Some(start), Some(end)).snapshot();
        assert!(snap.enabled);
        assert_eq!(snap.window, Some(QuietWindow::new(start, end)));
    }

    #[test]
    fn half_configured_window_is_ignored() {
        let start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        let snap = pref(true, Some(start), None).snapshot();
        assert!(snap.window.is_none());
    }
}
