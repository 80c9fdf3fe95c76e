//! The closed set of notification delivery channels.
//!
//! Channel tags are stored verbatim in the `notifications.notification_type`
//! and `user_notification_prefs.channel` columns and appear in inbound
//! billing event payloads. Unknown tags are rejected at parse time instead
//! of being threaded through the pipeline as strings.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A delivery channel for billing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationChannel {
    /// SMTP email delivery.
    Email,
    /// SMS gateway delivery.
    Sms,
    /// Mobile push delivery.
    Push,
}

impl NotificationChannel {
    /// All channels, in registration order.
    pub const ALL: [NotificationChannel; 3] = [
        NotificationChannel::Email,
        NotificationChannel::Sms,
        NotificationChannel::Push,
    ];

    /// The stored/wire tag for this channel.
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Email => "EMAIL",
            NotificationChannel::Sms => "SMS",
            NotificationChannel::Push => "PUSH",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationChannel {
    type Err = CoreError;

    /// Parse a channel tag, case-insensitively. Unknown tags are a
    /// validation error — there is no default here; the inbound message
    /// model applies its own EMAIL fallback for an *absent* tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(NotificationChannel::Email),
            "SMS" => Ok(NotificationChannel::Sms),
            "PUSH" => Ok(NotificationChannel::Push),
            other => Err(CoreError::Validation(format!(
                "Unknown notification channel: \"{other}\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_tags() {
        assert_eq!(
            "EMAIL".parse::<NotificationChannel>().unwrap(),
            NotificationChannel::Email
        );
        assert_eq!(
            "sms".parse::<NotificationChannel>().unwrap(),
            NotificationChannel::Sms
        );
        assert_eq!(
            "Push".parse::<NotificationChannel>().unwrap(),
            NotificationChannel::Push
        );
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = "FAX".parse::<NotificationChannel>().unwrap_err();
        assert!(err.to_string().contains("FAX"));
    }

    #[test]
    fn round_trip_through_str() {
        for channel in NotificationChannel::ALL {
            assert_eq!(
                channel.as_str().parse::<NotificationChannel>().unwrap(),
                channel
            );
        }
    }
}
