//! Bounded retry and terminal dead-lettering.
//!
//! Three cooperating pieces:
//!
//! - [`RetryRouter`] — republishes a failed message for another delivery
//!   attempt, or routes it to the dead-letter topic once the bound is
//!   exhausted. Attempt counts travel in the `x-retry-attempts` header.
//! - [`DeadLetterConsumer`] — records a terminal FAILED row for every
//!   dead-lettered message.
//! - [`RetryScheduler`] — periodically rescans persisted FAILED records
//!   below the bound and re-dispatches them. This is the recovery path
//!   for messages that failed without ever reaching the broker retry
//!   mechanism (e.g. during a deploy), orthogonal to redelivery.

use std::sync::Arc;
use std::time::Duration;

use billcast_core::message::BillingMessage;
use billcast_core::types::DbId;
use billcast_db::repositories::NotificationRepo;
use billcast_db::DbPool;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tokio_util::sync::CancellationToken;

use crate::config::NotifyConfig;
use crate::dedup::DedupCache;
use crate::handler::{DeliveryError, DispatchRequest, HandlerRegistry};

/// Header carrying the number of failed delivery attempts so far.
pub const RETRY_ATTEMPTS_HEADER: &str = "x-retry-attempts";

/// Producer-side timeout for a single republish.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// RetryRouter
// ---------------------------------------------------------------------------

/// Routes failed messages back onto the billing topic, or to the
/// dead-letter topic once the retry bound is reached.
pub struct RetryRouter {
    producer: FutureProducer,
    billing_topic: String,
    dead_letter_topic: String,
    max_retries: i32,
}

impl RetryRouter {
    pub fn new(config: &NotifyConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            billing_topic: config.billing_topic.clone(),
            dead_letter_topic: config.dead_letter_topic.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Route one dispatch failure.
    ///
    /// `attempts` is the number of failed attempts *before* this one.
    /// Publishing is best-effort: if the broker is unreachable the
    /// periodic rescan of FAILED records picks the message up instead.
    pub async fn route_failure(&self, bill_id: DbId, payload: &str, attempts: i32) {
        let failed_attempts = attempts + 1;
        let key = bill_id.to_string();

        let topic = if failed_attempts >= self.max_retries {
            self.dead_letter_topic.as_str()
        } else {
            self.billing_topic.as_str()
        };

        let header_value = failed_attempts.to_string();
        let record = FutureRecord::to(topic)
            .payload(payload)
            .key(&key)
            .headers(OwnedHeaders::new().insert(Header {
                key: RETRY_ATTEMPTS_HEADER,
                value: Some(&header_value),
            }));

        match self
            .producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
        {
            Ok(_) => {
                if topic == self.dead_letter_topic {
                    tracing::error!(bill_id, failed_attempts, "Message routed to dead letter");
                } else {
                    tracing::warn!(bill_id, failed_attempts, "Message republished for retry");
                }
            }
            Err((e, _)) => {
                tracing::error!(bill_id, error = %e, "Failed to route message for retry; rescan will recover it");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DeadLetterConsumer
// ---------------------------------------------------------------------------

/// Consumes the dead-letter topic and records terminal failures.
pub struct DeadLetterConsumer {
    consumer: StreamConsumer,
    pool: DbPool,
    max_retries: i32,
}

impl DeadLetterConsumer {
    pub fn new(config: &NotifyConfig, pool: DbPool) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.dead_letter_group)
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[&config.dead_letter_topic])?;

        Ok(Self {
            consumer,
            pool,
            max_retries: config.max_retries,
        })
    }

    /// Run the dead-letter loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Dead letter consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dead letter consumer stopping");
                    break;
                }
                received = self.consumer.recv() => {
                    match received {
                        Ok(message) => {
                            let trace_id = format!("[DLT-P{}-O{}]", message.partition(), message.offset());
                            let payload = message
                                .payload()
                                .map(String::from_utf8_lossy)
                                .unwrap_or_default()
                                .into_owned();

                            if let Err(e) = self.record_terminal_failure(&payload, &trace_id).await {
                                // Do not commit: the record must not be lost.
                                tracing::error!(%trace_id, error = %e, "Failed to persist dead letter, leaving uncommitted");
                                continue;
                            }

                            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(%trace_id, error = %e, "Dead letter commit failed");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Dead letter consumer poll failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// Persist the terminal FAILED record for a dead-lettered payload.
    async fn record_terminal_failure(&self, payload: &str, trace_id: &str) -> Result<(), sqlx::Error> {
        // Legacy producers double-encoded DLT payloads; unwrap defensively.
        let msg = match BillingMessage::parse_dead_letter(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(%trace_id, error = %e, "Unparseable dead letter payload, dropping");
                return Ok(());
            }
        };

        // An unknown channel tag on a dead letter still deserves a
        // terminal record; fall back to the email channel for it.
        let channel = msg
            .channel()
            .unwrap_or(billcast_core::NotificationChannel::Email);

        let annotation = format!("Moved to dead letter after {} retries", self.max_retries);
        NotificationRepo::record_dead_letter(
            &self.pool,
            msg.user_id,
            msg.bill_id,
            channel.as_str(),
            &msg.recipient(channel),
            &msg.render_content(channel),
            self.max_retries,
            &annotation,
        )
        .await?;

        tracing::error!(%trace_id, bill_id = msg.bill_id, %channel, "Terminal failure recorded");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RetryScheduler
// ---------------------------------------------------------------------------

/// Periodic rescan of FAILED records below the retry bound.
pub struct RetryScheduler {
    pool: DbPool,
    registry: Arc<HandlerRegistry>,
    dedup: Arc<dyn DedupCache>,
    max_retries: i32,
    scan_limit: i64,
    interval: Duration,
    handler_timeout: Duration,
}

impl RetryScheduler {
    pub fn new(
        pool: DbPool,
        registry: Arc<HandlerRegistry>,
        dedup: Arc<dyn DedupCache>,
        config: &NotifyConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            dedup,
            max_retries: config.max_retries,
            scan_limit: config.retry_scan_limit,
            interval: config.retry_scan_interval,
            handler_timeout: config.handler_timeout,
        }
    }

    /// Run the rescan loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retry scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.scan_once().await {
                        Ok(0) => {}
                        Ok(retried) => tracing::info!(retried, "Retry scan re-dispatched failed notifications"),
                        Err(e) => tracing::error!(error = %e, "Retry scan failed"),
                    }
                }
            }
        }
    }

    /// One rescan pass: re-dispatch FAILED records below the bound.
    ///
    /// Returns the number of records successfully re-sent. Also exposed
    /// through the admin surface for manual triggering.
    pub async fn scan_once(&self) -> Result<usize, sqlx::Error> {
        let failed =
            NotificationRepo::list_failed_for_retry(&self.pool, self.max_retries, self.scan_limit)
                .await?;

        let mut resent = 0;
        for record in failed {
            let trace_id = format!("[retry-{}]", record.id);

            let channel: billcast_core::NotificationChannel =
                match record.notification_type.parse() {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::warn!(%trace_id, error = %e, "Skipping record with unknown channel");
                        continue;
                    }
                };

            NotificationRepo::mark_retrying(&self.pool, record.id).await?;

            let result = match self.registry.get(channel) {
                Ok(handler) => {
                    let request = DispatchRequest {
                        bill_id: record.bill_id,
                        user_id: record.user_id,
                        channel,
                        recipient: record.recipient.clone(),
                        content: record.content.clone(),
                    };
                    match tokio::time::timeout(
                        self.handler_timeout,
                        handler.deliver(&request, &trace_id),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(DeliveryError::Timeout(self.handler_timeout)),
                    }
                }
                Err(e) => Err(DeliveryError::Rejected(e.to_string())),
            };

            match result {
                Ok(()) => {
                    NotificationRepo::mark_sent(&self.pool, record.id).await?;
                    self.dedup.mark_sent(record.bill_id, channel).await;
                    self.dedup.clear_retry(record.bill_id).await;
                    resent += 1;
                }
                Err(e) => {
                    tracing::warn!(%trace_id, bill_id = record.bill_id, error = %e, "Retry dispatch failed");
                    NotificationRepo::mark_failed(&self.pool, record.id, &e.to_string()).await?;
                }
            }
        }

        Ok(resent)
    }
}
