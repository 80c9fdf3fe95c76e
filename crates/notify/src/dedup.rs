//! Duplicate/retry detection in front of the persistent store.
//!
//! Two Redis keys per message act as cheap hints:
//!
//! - `sent:{bill_id}:{type}` — TTL-bounded marker that the message was
//!   already delivered; its presence short-circuits processing.
//! - `retry:{bill_id}` — the existing notification record id, correlating
//!   broker redeliveries with the row they should update.
//!
//! These are hints, not truth: the Postgres upsert keyed on
//! `(bill_id, notification_type)` is what actually guarantees a single
//! SENT outcome. Every cache failure therefore degrades to [`Classification::Fresh`]
//! with a warning instead of failing the message.

use std::time::Duration;

use async_trait::async_trait;
use billcast_core::channels::NotificationChannel;
use billcast_core::types::DbId;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The dedup verdict for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Already delivered; stop processing, write nothing.
    Duplicate,
    /// A redelivery of a previously failed message; the upsert will reuse
    /// the identified row.
    Retry { existing_id: DbId },
    /// Never seen (or the cache has no memory of it).
    Fresh,
}

// ---------------------------------------------------------------------------
// DedupCache
// ---------------------------------------------------------------------------

/// Idempotency guard consulted before dispatch.
///
/// Implementations must be infallible from the caller's perspective:
/// store errors degrade to `Fresh` / no-op because correctness rests on
/// the persistent upsert, not on this cache.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Classify a message by its logical identity.
    async fn classify(&self, bill_id: DbId, channel: NotificationChannel) -> Classification;

    /// Record a successful delivery (TTL-bounded).
    async fn mark_sent(&self, bill_id: DbId, channel: NotificationChannel);

    /// Correlate future redeliveries of `bill_id` with an existing record.
    async fn mark_retry(&self, bill_id: DbId, notification_id: DbId);

    /// Drop the retry correlation after a successful delivery.
    async fn clear_retry(&self, bill_id: DbId);
}

// ---------------------------------------------------------------------------
// RedisDedupCache
// ---------------------------------------------------------------------------

/// Redis-backed implementation of [`DedupCache`].
#[derive(Clone)]
pub struct RedisDedupCache {
    conn: ConnectionManager,
    sent_ttl: Duration,
}

impl RedisDedupCache {
    pub fn new(conn: ConnectionManager, sent_ttl: Duration) -> Self {
        Self { conn, sent_ttl }
    }

    fn sent_key(bill_id: DbId, channel: NotificationChannel) -> String {
        format!("sent:{bill_id}:{channel}")
    }

    fn retry_key(bill_id: DbId) -> String {
        format!("retry:{bill_id}")
    }

    async fn try_classify(
        &self,
        bill_id: DbId,
        channel: NotificationChannel,
    ) -> Result<Classification, redis::RedisError> {
        let mut conn = self.conn.clone();

        let already_sent: bool = conn.exists(Self::sent_key(bill_id, channel)).await?;
        if already_sent {
            return Ok(Classification::Duplicate);
        }

        let existing: Option<DbId> = conn.get(Self::retry_key(bill_id)).await?;
        Ok(match existing {
            Some(existing_id) => Classification::Retry { existing_id },
            None => Classification::Fresh,
        })
    }
}

#[async_trait]
impl DedupCache for RedisDedupCache {
    async fn classify(&self, bill_id: DbId, channel: NotificationChannel) -> Classification {
        match self.try_classify(bill_id, channel).await {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(bill_id, %channel, error = %e, "Dedup cache unavailable, treating as fresh");
                Classification::Fresh
            }
        }
    }

    async fn mark_sent(&self, bill_id: DbId, channel: NotificationChannel) {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn
            .set_ex(
                Self::sent_key(bill_id, channel),
                1,
                self.sent_ttl.as_secs(),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(bill_id, %channel, error = %e, "Failed to write sent marker");
        }
    }

    async fn mark_retry(&self, bill_id: DbId, notification_id: DbId) {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn
            .set_ex(
                Self::retry_key(bill_id),
                notification_id,
                self.sent_ttl.as_secs(),
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(bill_id, error = %e, "Failed to write retry correlation");
        }
    }

    async fn clear_retry(&self, bill_id: DbId) {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn.del(Self::retry_key(bill_id)).await;
        if let Err(e) = result {
            tracing::warn!(bill_id, error = %e, "Failed to clear retry correlation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_documented_shape() {
        assert_eq!(
            RedisDedupCache::sent_key(42, NotificationChannel::Email),
            "sent:42:EMAIL"
        );
        assert_eq!(RedisDedupCache::retry_key(42), "retry:42");
    }
}
