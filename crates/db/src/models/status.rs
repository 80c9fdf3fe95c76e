//! Notification lifecycle status.
//!
//! Stored as TEXT in `notifications.status`. The lifecycle is
//! `PENDING | WAITING → SENT | FAILED`, with `FAILED → RETRY → SENT | FAILED`
//! on rescan; terminal states are `SENT` and `FAILED` at the retry bound.

/// Persisted status of a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    /// Created but not yet dispatched.
    Pending,
    /// Deferred into the waiting queue by a quiet window.
    Waiting,
    /// Delivered to the transport.
    Sent,
    /// Dispatch failed; retriable until the retry bound is reached.
    Failed,
    /// Picked up by the retry scan, dispatch in progress.
    Retry,
}

impl NotificationStatus {
    /// The stored column value.
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Waiting => "WAITING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Failed => "FAILED",
            NotificationStatus::Retry => "RETRY",
        }
    }

    /// Parse a stored column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(NotificationStatus::Pending),
            "WAITING" => Some(NotificationStatus::Waiting),
            "SENT" => Some(NotificationStatus::Sent),
            "FAILED" => Some(NotificationStatus::Failed),
            "RETRY" => Some(NotificationStatus::Retry),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_values_round_trip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Waiting,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
            NotificationStatus::Retry,
        ] {
            assert_eq!(NotificationStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_value_does_not_parse() {
        assert_eq!(NotificationStatus::parse("SHIPPED"), None);
    }
}
