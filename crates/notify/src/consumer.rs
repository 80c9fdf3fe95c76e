//! Batched Kafka consumption of billing events.
//!
//! [`BillingEventConsumer`] pulls records from the billing topic,
//! accumulates them into batches (bounded by size and a linger window),
//! runs each batch through the [`BatchProcessor`], and commits offsets
//! only after the batch's bulk persistence call has succeeded. A failed
//! batch is left uncommitted so the broker redelivers it in full — the
//! dedup and upsert guarantees make that replay safe.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::ClientConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::NotifyConfig;
use crate::processor::{BatchProcessor, InboundRecord};
use crate::retry::RETRY_ATTEMPTS_HEADER;

/// Consumes the billing events topic in batches.
pub struct BillingEventConsumer {
    consumer: StreamConsumer,
    processor: BatchProcessor,
    topic: String,
    batch_max_size: usize,
    batch_linger: Duration,
}

impl BillingEventConsumer {
    pub fn new(config: &NotifyConfig, processor: BatchProcessor) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.consumer_group)
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[&config.billing_topic])?;

        Ok(Self {
            consumer,
            processor,
            topic: config.billing_topic.clone(),
            batch_max_size: config.batch_max_size,
            batch_linger: config.batch_linger,
        })
    }

    /// Run the consume loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(topic = %self.topic, "Billing event consumer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Billing event consumer stopping");
                    break;
                }
                received = self.consumer.recv() => {
                    match received {
                        Ok(first) => {
                            let mut records = Vec::with_capacity(self.batch_max_size);
                            let mut offsets: HashMap<i32, i64> = HashMap::new();
                            absorb(&first, &mut records, &mut offsets);
                            // Release the borrowed message before the
                            // batch's await points.
                            drop(first);

                            self.fill_batch(&mut records, &mut offsets).await;
                            self.handle_batch(records, offsets).await;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Consumer poll failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// Keep accumulating until the batch is full or the linger window
    /// closes.
    async fn fill_batch(
        &self,
        records: &mut Vec<InboundRecord>,
        offsets: &mut HashMap<i32, i64>,
    ) {
        let deadline = Instant::now() + self.batch_linger;
        while records.len() < self.batch_max_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.consumer.recv()).await {
                Ok(Ok(message)) => absorb(&message, records, offsets),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Poll failed mid-batch");
                    break;
                }
                Err(_) => break, // linger elapsed
            }
        }
    }

    /// Process one accumulated batch and commit on success.
    async fn handle_batch(&self, records: Vec<InboundRecord>, offsets: HashMap<i32, i64>) {
        let batch_size = records.len();
        let started = Instant::now();

        match self.processor.process_batch(records).await {
            Ok(summary) => {
                tracing::info!(
                    batch_size,
                    sent = summary.sent,
                    failed = summary.failed,
                    waiting = summary.waiting,
                    duplicates = summary.duplicates,
                    dropped = summary.dropped,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch processed"
                );
                self.commit(&offsets);
            }
            Err(e) => {
                // No commit: the broker redelivers the whole batch and
                // idempotency absorbs the replay.
                tracing::error!(batch_size, error = %e, "Batch persistence failed, leaving offsets uncommitted");
            }
        }
    }

    /// Commit the highest processed offset per partition.
    fn commit(&self, offsets: &HashMap<i32, i64>) {
        let mut tpl = TopicPartitionList::new();
        for (&partition, &offset) in offsets {
            // Commit points at the *next* offset to consume.
            if let Err(e) = tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1)) {
                tracing::error!(partition, offset, error = %e, "Failed to stage offset for commit");
                return;
            }
        }
        if let Err(e) = self.consumer.commit(&tpl, CommitMode::Async) {
            tracing::error!(error = %e, "Offset commit failed");
        }
    }
}

/// Convert a broker message into an [`InboundRecord`] and track its offset.
fn absorb(
    message: &BorrowedMessage<'_>,
    records: &mut Vec<InboundRecord>,
    offsets: &mut HashMap<i32, i64>,
) {
    let payload = message
        .payload()
        .map(String::from_utf8_lossy)
        .unwrap_or_default()
        .into_owned();

    records.push(InboundRecord {
        payload,
        trace_id: format!("[P{}-O{}]", message.partition(), message.offset()),
        attempts: attempts_from(message),
    });

    offsets
        .entry(message.partition())
        .and_modify(|o| *o = (*o).max(message.offset()))
        .or_insert(message.offset());
}

/// Read the failed-attempt counter from the retry header, defaulting to 0.
fn attempts_from(message: &BorrowedMessage<'_>) -> i32 {
    let Some(headers) = message.headers() else {
        return 0;
    };
    for header in headers.iter() {
        if header.key == RETRY_ATTEMPTS_HEADER {
            return header
                .value
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
        }
    }
    0
}
