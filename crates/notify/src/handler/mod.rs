//! Channel handlers and the handler registry.
//!
//! Each delivery channel implements [`ChannelHandler`]; the
//! [`HandlerRegistry`] maps the closed [`NotificationChannel`] set to the
//! handler instances wired at startup. Looking up a channel with no
//! registered handler is a configuration error, not a transient one.

pub mod email;
pub mod push;
pub mod sms;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use billcast_core::channels::NotificationChannel;
use billcast_core::error::CoreError;
use billcast_core::types::DbId;

pub use email::{EmailConfig, EmailHandler};
pub use push::PushHandler;
pub use sms::SmsHandler;

// ---------------------------------------------------------------------------
// DispatchRequest / DeliveryError
// ---------------------------------------------------------------------------

/// A fully rendered send: everything a transport needs, nothing more.
///
/// Built from the inbound message on the live path and from the persisted
/// record on the retry rescan path, so both can dispatch identically.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub bill_id: DbId,
    pub user_id: DbId,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub content: String,
}

/// Error type for channel delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The transport itself failed (connection, DNS, protocol).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider accepted the connection but rejected the message.
    #[error("Provider rejected the message: {0}")]
    Rejected(String),

    /// The per-call deadline elapsed. Treated identically to a failure.
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// ChannelHandler
// ---------------------------------------------------------------------------

/// A transport-specific send implementation.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Perform the actual send. `trace_id` identifies the source record
    /// (partition/offset or retry id) in logs.
    async fn deliver(&self, request: &DispatchRequest, trace_id: &str)
        -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Maps channels to their registered handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NotificationChannel, Arc<dyn ChannelHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a channel, replacing any previous one.
    pub fn register(&mut self, channel: NotificationChannel, handler: Arc<dyn ChannelHandler>) {
        self.handlers.insert(channel, handler);
    }

    /// Look up the handler for a channel.
    ///
    /// An unregistered channel is a deployment misconfiguration and is
    /// reported as such rather than silently defaulting.
    pub fn get(&self, channel: NotificationChannel) -> Result<Arc<dyn ChannelHandler>, CoreError> {
        self.handlers.get(&channel).cloned().ok_or_else(|| {
            CoreError::Configuration(format!("No handler registered for channel {channel}"))
        })
    }

    /// The channels with a registered handler, in canonical order.
    pub fn list_available(&self) -> Vec<NotificationChannel> {
        NotificationChannel::ALL
            .into_iter()
            .filter(|c| self.handlers.contains_key(c))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct NoopHandler;

    #[async_trait]
    impl ChannelHandler for NoopHandler {
        async fn deliver(
            &self,
            _request: &DispatchRequest,
            _trace_id: &str,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_channel_is_a_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry.get(NotificationChannel::Sms).err().unwrap();
        assert_matches!(err, CoreError::Configuration(_));
        assert!(err.to_string().contains("SMS"));
    }

    #[test]
    fn registered_channels_are_listed_in_canonical_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(NotificationChannel::Push, Arc::new(NoopHandler));
        registry.register(NotificationChannel::Email, Arc::new(NoopHandler));

        assert_eq!(
            registry.list_available(),
            vec![NotificationChannel::Email, NotificationChannel::Push]
        );
    }

    #[tokio::test]
    async fn registered_handler_is_returned_and_usable() {
        let mut registry = HandlerRegistry::new();
        registry.register(NotificationChannel::Email, Arc::new(NoopHandler));

        let handler = registry.get(NotificationChannel::Email).unwrap();
        let request = DispatchRequest {
            bill_id: 1,
            user_id: 2,
            channel: NotificationChannel::Email,
            recipient: "user@example.com".to_string(),
            content: "hello".to_string(),
        };
        assert!(handler.deliver(&request, "[test]").await.is_ok());
    }
}
