//! Durable, time-ordered waiting queue for policy-blocked messages.
//!
//! Backed by a Redis sorted set: member = the serialized original
//! message, score = release time in epoch seconds. Entries survive a
//! process restart, and [`DeferralQueue::drain_ready`] does not remove
//! what it returns — removal happens only after the caller has
//! successfully re-injected the message, so a crash between read and
//! reprocess loses nothing (the dedup marker absorbs the double send).

use async_trait::async_trait;
use billcast_core::types::Timestamp;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Sorted-set key holding deferred messages.
const QUEUE_KEY: &str = "queue:waiting";

/// Error type for waiting-queue operations.
///
/// Unlike the dedup cache, the queue is load-bearing: losing an enqueue
/// would lose a message, so store errors surface to the caller.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// A durable deferral store for quiet-window-blocked messages.
#[async_trait]
pub trait DeferralQueue: Send + Sync {
    /// Insert a message, releasing no earlier than `release_at`.
    ///
    /// Re-enqueueing the same payload updates its release time.
    async fn enqueue(&self, payload: &str, release_at: Timestamp) -> Result<(), QueueError>;

    /// Entries whose release time has passed, ascending by release time,
    /// up to `limit`. Does not remove them.
    async fn drain_ready(&self, limit: usize) -> Result<Vec<String>, QueueError>;

    /// Remove an entry after successful re-injection.
    async fn remove(&self, payload: &str) -> Result<bool, QueueError>;

    /// Number of entries currently deferred.
    async fn len(&self) -> Result<u64, QueueError>;

    /// Drop every entry. Operational escape hatch, exposed on the admin
    /// surface.
    async fn clear(&self) -> Result<(), QueueError>;
}

/// Redis sorted-set implementation of [`DeferralQueue`].
#[derive(Clone)]
pub struct RedisWaitingQueue {
    conn: ConnectionManager,
}

impl RedisWaitingQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeferralQueue for RedisWaitingQueue {
    async fn enqueue(&self, payload: &str, release_at: Timestamp) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let score = release_at.timestamp();
        let _: () = conn.zadd(QUEUE_KEY, payload, score).await?;
        tracing::debug!(release_at = %release_at, "Message deferred to waiting queue");
        Ok(())
    }

    async fn drain_ready(&self, limit: usize) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();
        let ready: Vec<String> = conn
            .zrangebyscore_limit(QUEUE_KEY, 0, now, 0, limit as isize)
            .await?;
        Ok(ready)
    }

    async fn remove(&self, payload: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.zrem(QUEUE_KEY, payload).await?;
        Ok(removed > 0)
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let size: u64 = conn.zcard(QUEUE_KEY).await?;
        Ok(size)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(QUEUE_KEY).await?;
        tracing::info!("Waiting queue cleared");
        Ok(())
    }
}
