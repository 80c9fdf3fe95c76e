//! Billcast notification dispatch pipeline.
//!
//! This crate implements the consumption side of the billing
//! notification system:
//!
//! - [`consumer::BillingEventConsumer`] — batched Kafka consumption with
//!   manual offset commit.
//! - [`processor::BatchProcessor`] — per-record classification, policy
//!   resolution, and channel dispatch across a bounded worker pool,
//!   followed by one bulk persistence call per batch.
//! - [`dedup`] — Redis-backed duplicate/retry detection in front of the
//!   authoritative Postgres store.
//! - [`queue`] — the durable, time-ordered waiting queue for messages
//!   blocked by a quiet window.
//! - [`handler`] — the channel handler trait, registry, and the email /
//!   SMS / push implementations.
//! - [`retry`] — broker-level retry routing, the dead-letter consumer,
//!   and the periodic FAILED-record rescan.
//! - [`scheduler`] — the periodic waiting-queue drain.

pub mod config;
pub mod consumer;
pub mod dedup;
pub mod handler;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod scheduler;

pub use config::NotifyConfig;
pub use consumer::BillingEventConsumer;
pub use dedup::{Classification, DedupCache, RedisDedupCache};
pub use handler::{ChannelHandler, DispatchRequest, HandlerRegistry};
pub use processor::BatchProcessor;
pub use queue::{DeferralQueue, RedisWaitingQueue};
pub use retry::{DeadLetterConsumer, RetryRouter, RetryScheduler};
pub use scheduler::WaitingQueueScheduler;
