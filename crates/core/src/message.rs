//! Inbound billing event payloads.
//!
//! [`BillingMessage`] is the JSON body published on the billing events
//! topic by the upstream billing extractor. It is consumed read-only:
//! the pipeline parses it, derives the target channel, and renders the
//! per-channel recipient and content from it.

use serde::{Deserialize, Serialize};

use crate::channels::NotificationChannel;
use crate::error::CoreError;
use crate::types::DbId;

/// Placeholder shown when the upstream job did not supply a due date.
const DUE_DATE_UNSET: &str = "not scheduled";

/// A billing event as published by the upstream extractor.
///
/// All fields beyond the two ids are optional on the wire; consumers must
/// tolerate partial payloads from older producer versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingMessage {
    pub bill_id: DbId,
    pub user_id: DbId,
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub bill_year_month: Option<String>,
    #[serde(default)]
    pub total_amount: Option<i64>,
    #[serde(default)]
    pub due_date: Option<String>,
}

impl BillingMessage {
    /// Parse a raw topic payload.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Parse a dead-letter payload, unwrapping double-encoded JSON first.
    ///
    /// Older producers published the DLT payload as a JSON string
    /// containing JSON (`"\"{...}\""`); both encodings must be accepted.
    pub fn parse_dead_letter(raw: &str) -> Result<Self, serde_json::Error> {
        let trimmed = raw.trim();
        if trimmed.starts_with('"') && trimmed.ends_with('"') {
            let inner: String = serde_json::from_str(trimmed)?;
            return Self::parse(&inner);
        }
        Self::parse(trimmed)
    }

    /// The target channel for this message.
    ///
    /// An absent tag defaults to EMAIL (legacy producers omit it); an
    /// unknown tag is a validation error and poisons only this record.
    pub fn channel(&self) -> Result<NotificationChannel, CoreError> {
        match self.notification_type.as_deref() {
            None | Some("") => Ok(NotificationChannel::Email),
            Some(tag) => tag.parse(),
        }
    }

    /// The recipient address for the given channel.
    ///
    /// A missing email/phone yields an empty string; the transport will
    /// reject it and the outcome is recorded as a delivery failure.
    pub fn recipient(&self, channel: NotificationChannel) -> String {
        match channel {
            NotificationChannel::Email => self.recipient_email.clone().unwrap_or_default(),
            NotificationChannel::Sms => self.recipient_phone.clone().unwrap_or_default(),
            NotificationChannel::Push => format!("user:{}", self.user_id),
        }
    }

    /// Render the notification body for the given channel.
    pub fn render_content(&self, channel: NotificationChannel) -> String {
        let period = self.bill_year_month.as_deref().unwrap_or("(unknown period)");
        let amount = self.total_amount.unwrap_or(0);
        let due = self.due_date.as_deref().unwrap_or(DUE_DATE_UNSET);

        match channel {
            NotificationChannel::Email => format!(
                "Billing statement\nBilling period: {period}\nTotal amount due: {amount}\nPayment due by: {due}"
            ),
            NotificationChannel::Sms => {
                format!("[Billing] {period} statement: {amount} due. Pay by {due}.")
            }
            NotificationChannel::Push => {
                format!("[Billing] {period} statement: {amount} due. Open the app for details.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "billId": 101,
            "userId": 7,
            "notificationType": "SMS",
            "recipientEmail": "user@example.com",
            "recipientPhone": "010-1234-5678",
            "billYearMonth": "2026-07",
            "totalAmount": 45900,
            "dueDate": "2026-08-25"
        }"#
    }

    #[test]
    fn parses_full_payload() {
        let msg = BillingMessage::parse(sample_json()).unwrap();
        assert_eq!(msg.bill_id, 101);
        assert_eq!(msg.user_id, 7);
        assert_eq!(msg.channel().unwrap(), NotificationChannel::Sms);
        assert_eq!(msg.total_amount, Some(45900));
    }

    #[test]
    fn missing_type_defaults_to_email() {
        let msg = BillingMessage::parse(r#"{"billId": 1, "userId": 2}"#).unwrap();
        assert_eq!(msg.channel().unwrap(), NotificationChannel::Email);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let msg = BillingMessage::parse(
            r#"{"billId": 1, "userId": 2, "notificationType": "CARRIER_PIGEON"}"#,
        )
        .unwrap();
        assert!(msg.channel().is_err());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(BillingMessage::parse("{not json").is_err());
    }

    #[test]
    fn dead_letter_accepts_double_encoded_payload() {
        let double = serde_json::to_string(sample_json()).unwrap();
        let msg = BillingMessage::parse_dead_letter(&double).unwrap();
        assert_eq!(msg.bill_id, 101);
    }

    #[test]
    fn dead_letter_accepts_plain_payload() {
        let msg = BillingMessage::parse_dead_letter(sample_json()).unwrap();
        assert_eq!(msg.bill_id, 101);
    }

    #[test]
    fn recipient_per_channel() {
        let msg = BillingMessage::parse(sample_json()).unwrap();
        assert_eq!(
            msg.recipient(NotificationChannel::Email),
            "user@example.com"
        );
        assert_eq!(msg.recipient(NotificationChannel::Sms), "010-1234-5678");
        assert_eq!(msg.recipient(NotificationChannel::Push), "user:7");
    }

    #[test]
    fn content_mentions_period_and_amount() {
        let msg = BillingMessage::parse(sample_json()).unwrap();
        for channel in NotificationChannel::ALL {
            let content = msg.render_content(channel);
            assert!(content.contains("2026-07"), "{channel}: {content}");
            assert!(content.contains("45900"), "{channel}: {content}");
        }
    }

    #[test]
    fn content_defaults_for_sparse_payload() {
        let msg = BillingMessage::parse(r#"{"billId": 1, "userId": 2}"#).unwrap();
        let content = msg.render_content(NotificationChannel::Sms);
        assert!(content.contains("not scheduled"));
    }
}
