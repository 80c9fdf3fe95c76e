//! Batched message processing: classify, resolve policy, dispatch,
//! persist.
//!
//! [`BatchProcessor::process_batch`] fans a batch of raw broker records
//! out across a bounded worker pool, waits for every record to finish
//! (a per-batch barrier with no intra-batch ordering), accumulates the
//! resulting [`NewNotification`] outcomes, and writes them with a single
//! bulk upsert. The caller commits the batch offset only after that
//! upsert succeeds; a persistence failure propagates so the whole batch
//! is redelivered and absorbed by the idempotency guarantees.

use std::sync::Arc;
use std::time::Duration;

use billcast_core::channels::NotificationChannel;
use billcast_core::message::BillingMessage;
use billcast_core::policy::{self, PolicyReason, QuietWindow};
use billcast_core::types::Timestamp;
use billcast_db::models::{NewNotification, NotificationStatus};
use billcast_db::repositories::{NotificationRepo, PreferenceRepo};
use billcast_db::DbPool;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::dedup::{Classification, DedupCache};
use crate::handler::{DeliveryError, DispatchRequest, HandlerRegistry};
use crate::queue::DeferralQueue;
use crate::retry::RetryRouter;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One raw broker record entering the pipeline.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    /// The raw JSON payload.
    pub payload: String,
    /// Log correlation tag, e.g. `[P3-O1042]`.
    pub trace_id: String,
    /// Failed delivery attempts so far (from the retry header; 0 for a
    /// first delivery).
    pub attempts: i32,
}

/// Aggregate result of one processed batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    pub received: usize,
    pub persisted: u64,
    pub sent: usize,
    pub failed: usize,
    pub waiting: usize,
    pub duplicates: usize,
    pub dropped: usize,
}

/// What happened to a waiting-queue payload on re-injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessOutcome {
    /// Dispatched (or found to be a duplicate); safe to remove from the
    /// queue.
    Completed,
    /// Still blocked; re-deferred with a new release time, so the queue
    /// entry must stay.
    Deferred,
    /// Unparseable; remove so it cannot poison the queue forever.
    Discarded,
}

/// Error type for batch processing.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The bulk persistence call failed; the batch must not be committed.
    #[error("Bulk persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Per-record processing outcome, before persistence.
#[derive(Debug)]
enum Outcome {
    Processed(NewNotification),
    Duplicate,
    Dropped,
}

// ---------------------------------------------------------------------------
// BatchProcessor
// ---------------------------------------------------------------------------

/// The notification pipeline core. Cheap to clone; clones share the
/// worker-pool semaphore, so total dispatch concurrency stays bounded no
/// matter how many consumers feed it.
#[derive(Clone)]
pub struct BatchProcessor {
    pool: DbPool,
    registry: Arc<HandlerRegistry>,
    dedup: Arc<dyn DedupCache>,
    queue: Arc<dyn DeferralQueue>,
    router: Option<Arc<RetryRouter>>,
    workers: Arc<Semaphore>,
    handler_timeout: Duration,
    system_window: QuietWindow,
}

impl BatchProcessor {
    pub fn new(
        pool: DbPool,
        registry: Arc<HandlerRegistry>,
        dedup: Arc<dyn DedupCache>,
        queue: Arc<dyn DeferralQueue>,
        router: Option<Arc<RetryRouter>>,
        worker_pool_size: usize,
        handler_timeout: Duration,
        system_window: QuietWindow,
    ) -> Self {
        Self {
            pool,
            registry,
            dedup,
            queue,
            router,
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            handler_timeout,
            system_window,
        }
    }

    /// Process one batch end to end.
    ///
    /// Returns an error only for the bulk persistence failure case; every
    /// per-record failure (parse, policy store, dispatch) is absorbed into
    /// that record's own outcome.
    pub async fn process_batch(
        &self,
        records: Vec<InboundRecord>,
    ) -> Result<BatchSummary, ProcessError> {
        let now = Utc::now();
        let (outcomes, mut summary) = self.fan_out(records, now).await;

        // A redelivered message can appear twice in one batch before its
        // dedup marker lands; the single-statement upsert cannot touch
        // the same identity twice, so collapse outcomes first.
        let outcomes = collapse_by_identity(outcomes);

        summary.persisted = NotificationRepo::bulk_upsert(&self.pool, &outcomes).await?;
        self.correlate_failures(&outcomes).await;

        Ok(summary)
    }

    /// Re-inject a waiting-queue payload through the same pipeline.
    pub async fn reprocess(&self, payload: &str) -> Result<ReprocessOutcome, ProcessError> {
        let record = InboundRecord {
            payload: payload.to_string(),
            trace_id: "[queue]".to_string(),
            attempts: 0,
        };

        match self.process_record(record, Utc::now()).await {
            Outcome::Processed(outcome) => {
                let deferred = outcome.status == NotificationStatus::Waiting;
                NotificationRepo::bulk_upsert(&self.pool, std::slice::from_ref(&outcome)).await?;
                self.correlate_failures(std::slice::from_ref(&outcome)).await;
                Ok(if deferred {
                    ReprocessOutcome::Deferred
                } else {
                    ReprocessOutcome::Completed
                })
            }
            Outcome::Duplicate => Ok(ReprocessOutcome::Completed),
            Outcome::Dropped => Ok(ReprocessOutcome::Discarded),
        }
    }

    /// Fan the batch out across the worker pool and join every unit.
    async fn fan_out(
        &self,
        records: Vec<InboundRecord>,
        now: Timestamp,
    ) -> (Vec<NewNotification>, BatchSummary) {
        let mut summary = BatchSummary {
            received: records.len(),
            ..BatchSummary::default()
        };

        let mut join_set = JoinSet::new();
        for record in records {
            let this = self.clone();
            join_set.spawn(async move {
                let _permit = match Arc::clone(&this.workers).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Outcome::Dropped,
                };
                this.process_record(record, now).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Outcome::Processed(outcome)) => {
                    match outcome.status {
                        NotificationStatus::Sent => summary.sent += 1,
                        NotificationStatus::Failed => summary.failed += 1,
                        NotificationStatus::Waiting => summary.waiting += 1,
                        _ => {}
                    }
                    outcomes.push(outcome);
                }
                Ok(Outcome::Duplicate) => summary.duplicates += 1,
                Ok(Outcome::Dropped) => summary.dropped += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Batch worker panicked");
                    summary.dropped += 1;
                }
            }
        }

        (outcomes, summary)
    }

    /// Process a single record. Never returns an error: every failure
    /// mode maps to an outcome so one record cannot block the batch.
    async fn process_record(&self, record: InboundRecord, now: Timestamp) -> Outcome {
        let msg = match BillingMessage::parse(&record.payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(trace_id = %record.trace_id, error = %e, "Dropping unparseable payload");
                return Outcome::Dropped;
            }
        };

        let channel = match msg.channel() {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(trace_id = %record.trace_id, bill_id = msg.bill_id, error = %e, "Dropping message with unknown channel");
                return Outcome::Dropped;
            }
        };

        match self.dedup.classify(msg.bill_id, channel).await {
            Classification::Duplicate => {
                tracing::debug!(trace_id = %record.trace_id, bill_id = msg.bill_id, %channel, "Duplicate send suppressed");
                return Outcome::Duplicate;
            }
            // Retry and Fresh both proceed; the upsert reuses the
            // existing row either way.
            Classification::Retry { existing_id } => {
                tracing::debug!(trace_id = %record.trace_id, bill_id = msg.bill_id, existing_id, "Redelivery correlated with existing record");
            }
            Classification::Fresh => {}
        }

        // Policy resolution: a preference-store failure falls back to the
        // system policy rather than failing the message.
        let snapshot = match PreferenceRepo::get_for_channel(&self.pool, msg.user_id, channel.as_str())
            .await
        {
            Ok(pref) => pref.map(|p| p.snapshot()),
            Err(e) => {
                tracing::warn!(user_id = msg.user_id, %channel, error = %e, "Preference lookup failed, applying system policy");
                None
            }
        };

        let decision = policy::resolve(snapshot.as_ref(), &self.system_window, now.time());
        if decision.blocked {
            return self.defer(&record, &msg, channel, decision.reason, decision.window, now).await;
        }

        self.dispatch(&record, &msg, channel, now).await
    }

    /// Park a blocked message in the waiting queue.
    async fn defer(
        &self,
        record: &InboundRecord,
        msg: &BillingMessage,
        channel: NotificationChannel,
        reason: PolicyReason,
        window: Option<QuietWindow>,
        now: Timestamp,
    ) -> Outcome {
        // A disabled channel has no window to release on; the record is
        // kept PENDING and nothing is sent unless the user re-enables
        // the channel and the message is redelivered.
        let Some(window) = window else {
            tracing::info!(
                trace_id = %record.trace_id,
                bill_id = msg.bill_id,
                %channel,
                "Channel disabled by user preference, send suppressed"
            );
            return Outcome::Processed(build_outcome(
                msg,
                channel,
                NotificationStatus::Pending,
                now,
                None,
                Some("Channel disabled by user preference".to_string()),
            ));
        };

        let release = policy::release_at(now, &window);

        if let Err(e) = self.queue.enqueue(&record.payload, release).await {
            tracing::error!(trace_id = %record.trace_id, bill_id = msg.bill_id, error = %e, "Failed to defer message");
            return Outcome::Processed(build_outcome(
                msg,
                channel,
                NotificationStatus::Failed,
                now,
                None,
                Some(format!("Failed to enqueue blocked message: {e}")),
            ));
        }

        tracing::info!(
            trace_id = %record.trace_id,
            bill_id = msg.bill_id,
            %channel,
            reason = reason.as_str(),
            release = %release,
            "Message deferred by quiet policy"
        );

        Outcome::Processed(build_outcome(
            msg,
            channel,
            NotificationStatus::Waiting,
            release,
            None,
            Some(format!("Deferred until {release} ({})", reason.as_str())),
        ))
    }

    /// Dispatch through the registered handler under the per-call timeout.
    async fn dispatch(
        &self,
        record: &InboundRecord,
        msg: &BillingMessage,
        channel: NotificationChannel,
        now: Timestamp,
    ) -> Outcome {
        let handler = match self.registry.get(channel) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::error!(trace_id = %record.trace_id, %channel, error = %e, "Dispatch misconfigured");
                return self.fail(record, msg, channel, now, e.to_string()).await;
            }
        };

        let request = DispatchRequest {
            bill_id: msg.bill_id,
            user_id: msg.user_id,
            channel,
            recipient: msg.recipient(channel),
            content: msg.render_content(channel),
        };

        let result = tokio::time::timeout(
            self.handler_timeout,
            handler.deliver(&request, &record.trace_id),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                self.dedup.mark_sent(msg.bill_id, channel).await;
                self.dedup.clear_retry(msg.bill_id).await;
                Outcome::Processed(build_outcome(
                    msg,
                    channel,
                    NotificationStatus::Sent,
                    now,
                    Some(now),
                    None,
                ))
            }
            Ok(Err(e)) => {
                tracing::error!(trace_id = %record.trace_id, bill_id = msg.bill_id, %channel, error = %e, "Dispatch failed");
                self.fail(record, msg, channel, now, e.to_string()).await
            }
            Err(_) => {
                let e = DeliveryError::Timeout(self.handler_timeout);
                tracing::error!(trace_id = %record.trace_id, bill_id = msg.bill_id, %channel, error = %e, "Dispatch timed out");
                self.fail(record, msg, channel, now, e.to_string()).await
            }
        }
    }

    /// Record a dispatch failure and hand the payload to broker-level
    /// retry routing.
    async fn fail(
        &self,
        record: &InboundRecord,
        msg: &BillingMessage,
        channel: NotificationChannel,
        now: Timestamp,
        error: String,
    ) -> Outcome {
        if let Some(router) = &self.router {
            router
                .route_failure(msg.bill_id, &record.payload, record.attempts)
                .await;
        }

        Outcome::Processed(build_outcome(
            msg,
            channel,
            NotificationStatus::Failed,
            now,
            None,
            Some(error),
        ))
    }

    /// After persistence, point `retry:{bill_id}` at the row each FAILED
    /// outcome landed in, so the next redelivery correlates without a
    /// store round-trip.
    async fn correlate_failures(&self, outcomes: &[NewNotification]) {
        for outcome in outcomes {
            if outcome.status != NotificationStatus::Failed {
                continue;
            }
            match NotificationRepo::find_by_identity(
                &self.pool,
                outcome.bill_id,
                &outcome.notification_type,
            )
            .await
            {
                Ok(Some(row)) => self.dedup.mark_retry(outcome.bill_id, row.id).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(bill_id = outcome.bill_id, error = %e, "Retry correlation lookup failed");
                }
            }
        }
    }
}

/// Keep one outcome per `(bill_id, notification_type)` identity.
///
/// A SENT outcome always wins; otherwise the later completion replaces
/// the earlier one.
fn collapse_by_identity(outcomes: Vec<NewNotification>) -> Vec<NewNotification> {
    let mut by_identity: std::collections::HashMap<(i64, String), NewNotification> =
        std::collections::HashMap::with_capacity(outcomes.len());
    for outcome in outcomes {
        let key = (outcome.bill_id, outcome.notification_type.clone());
        match by_identity.get(&key) {
            Some(existing) if existing.status == NotificationStatus::Sent => {}
            _ => {
                by_identity.insert(key, outcome);
            }
        }
    }
    by_identity.into_values().collect()
}

/// Assemble the persistence outcome for one message.
fn build_outcome(
    msg: &BillingMessage,
    channel: NotificationChannel,
    status: NotificationStatus,
    scheduled_at: Timestamp,
    sent_at: Option<Timestamp>,
    error_message: Option<String>,
) -> NewNotification {
    NewNotification {
        user_id: msg.user_id,
        bill_id: msg.bill_id,
        notification_type: channel.as_str().to_string(),
        status,
        recipient: msg.recipient(channel),
        content: msg.render_content(channel),
        scheduled_at,
        sent_at,
        error_message,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use billcast_core::channels::NotificationChannel;
    use billcast_core::types::DbId;
    use chrono::{NaiveDate, NaiveTime};

    use crate::handler::ChannelHandler;
    use crate::queue::QueueError;

    // -- test doubles ---------------------------------------------------------

    /// In-memory dedup cache mirroring the Redis key semantics.
    #[derive(Default)]
    struct MemoryDedup {
        sent: Mutex<HashSet<(DbId, NotificationChannel)>>,
        retry: Mutex<HashMap<DbId, DbId>>,
    }

    #[async_trait]
    impl DedupCache for MemoryDedup {
        async fn classify(&self, bill_id: DbId, channel: NotificationChannel) -> Classification {
            if self.sent.lock().unwrap().contains(&(bill_id, channel)) {
                return Classification::Duplicate;
            }
            match self.retry.lock().unwrap().get(&bill_id) {
                Some(&existing_id) => Classification::Retry { existing_id },
                None => Classification::Fresh,
            }
        }

        async fn mark_sent(&self, bill_id: DbId, channel: NotificationChannel) {
            self.sent.lock().unwrap().insert((bill_id, channel));
        }

        async fn mark_retry(&self, bill_id: DbId, notification_id: DbId) {
            self.retry.lock().unwrap().insert(bill_id, notification_id);
        }

        async fn clear_retry(&self, bill_id: DbId) {
            self.retry.lock().unwrap().remove(&bill_id);
        }
    }

    /// In-memory waiting queue recording (payload, release) pairs.
    #[derive(Default)]
    struct MemoryQueue {
        entries: Mutex<HashMap<String, Timestamp>>,
    }

    #[async_trait]
    impl DeferralQueue for MemoryQueue {
        async fn enqueue(&self, payload: &str, release_at: Timestamp) -> Result<(), QueueError> {
            self.entries
                .lock()
                .unwrap()
                .insert(payload.to_string(), release_at);
            Ok(())
        }

        async fn drain_ready(&self, limit: usize) -> Result<Vec<String>, QueueError> {
            let now = Utc::now();
            let entries = self.entries.lock().unwrap();
            let mut ready: Vec<(&String, &Timestamp)> =
                entries.iter().filter(|(_, at)| **at <= now).collect();
            ready.sort_by_key(|(_, at)| **at);
            Ok(ready
                .into_iter()
                .take(limit)
                .map(|(p, _)| p.clone())
                .collect())
        }

        async fn remove(&self, payload: &str) -> Result<bool, QueueError> {
            Ok(self.entries.lock().unwrap().remove(payload).is_some())
        }

        async fn len(&self) -> Result<u64, QueueError> {
            Ok(self.entries.lock().unwrap().len() as u64)
        }

        async fn clear(&self) -> Result<(), QueueError> {
            self.entries.lock().unwrap().clear();
            Ok(())
        }
    }

    /// Counts deliveries; optionally fails or stalls every call.
    #[derive(Default)]
    struct ProbeHandler {
        calls: AtomicUsize,
        fail: bool,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl ChannelHandler for ProbeHandler {
        async fn deliver(
            &self,
            _request: &DispatchRequest,
            _trace_id: &str,
        ) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail {
                return Err(DeliveryError::Transport("simulated outage".to_string()));
            }
            Ok(())
        }
    }

    // -- harness --------------------------------------------------------------

    struct Harness {
        processor: BatchProcessor,
        email: Arc<ProbeHandler>,
        queue: Arc<MemoryQueue>,
        dedup: Arc<MemoryDedup>,
    }

    fn harness_with(email: ProbeHandler) -> Harness {
        let email = Arc::new(email);
        let mut registry = HandlerRegistry::new();
        let email_handler: Arc<dyn ChannelHandler> = Arc::clone(&email) as Arc<dyn ChannelHandler>;
        registry.register(NotificationChannel::Email, email_handler);

        let dedup = Arc::new(MemoryDedup::default());
        let queue = Arc::new(MemoryQueue::default());

        // A lazy pool never connects in these tests: the preference
        // lookup fails and the resolver falls back to the system policy,
        // which is exactly the path under test.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/billcast_test")
            .expect("lazy pool");

        let processor = BatchProcessor::new(
            pool,
            Arc::new(registry),
            Arc::clone(&dedup) as Arc<dyn DedupCache>,
            Arc::clone(&queue) as Arc<dyn DeferralQueue>,
            None,
            4,
            Duration::from_millis(200),
            QuietWindow::system_default(),
        );

        Harness {
            processor,
            email,
            queue,
            dedup,
        }
    }

    fn harness() -> Harness {
        harness_with(ProbeHandler::default())
    }

    fn record(payload: &str) -> InboundRecord {
        InboundRecord {
            payload: payload.to_string(),
            trace_id: "[P0-O0]".to_string(),
            attempts: 0,
        }
    }

    fn payload(bill_id: i64) -> String {
        format!(
            r#"{{"billId": {bill_id}, "userId": 7, "notificationType": "EMAIL", "recipientEmail": "user@example.com", "billYearMonth": "2026-07", "totalAmount": 1000}}"#
        )
    }

    /// Midday UTC: outside the default system quiet window.
    fn daytime() -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 7, 14)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
            .and_utc()
    }

    /// 23:00 UTC: inside the default system quiet window.
    fn late_night() -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 7, 14)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(23, 0, 0).unwrap())
            .and_utc()
    }

    // -- behaviour ------------------------------------------------------------

    #[tokio::test]
    async fn allowed_message_is_dispatched_and_marked_sent() {
        let h = harness();
        let outcome = h.processor.process_record(record(&payload(1)), daytime()).await;

        let Outcome::Processed(n) = outcome else {
            panic!("expected a processed outcome");
        };
        assert_eq!(n.status, NotificationStatus::Sent);
        assert!(n.sent_at.is_some());
        assert_eq!(h.email.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.dedup.classify(1, NotificationChannel::Email).await,
            Classification::Duplicate
        );
    }

    #[tokio::test]
    async fn redelivery_is_suppressed_after_success() {
        let h = harness();
        let first = h.processor.process_record(record(&payload(2)), daytime()).await;
        assert_matches!(first, Outcome::Processed(_));

        let second = h.processor.process_record(record(&payload(2)), daytime()).await;
        assert_matches!(second, Outcome::Duplicate);
        // Exactly one dispatch across both deliveries.
        assert_eq!(h.email.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocked_message_is_deferred_with_next_window_end() {
        let h = harness();
        let outcome = h
            .processor
            .process_record(record(&payload(3)), late_night())
            .await;

        let Outcome::Processed(n) = outcome else {
            panic!("expected a processed outcome");
        };
        assert_eq!(n.status, NotificationStatus::Waiting);
        assert_eq!(h.email.calls.load(Ordering::SeqCst), 0);

        let entries = h.queue.entries.lock().unwrap();
        let release = entries.values().next().copied().expect("entry enqueued");
        // Blocked at 23:00 → released at the next 08:00.
        assert_eq!(
            release,
            NaiveDate::from_ymd_opt(2026, 7, 15)
                .unwrap()
                .and_time(NaiveTime::from_hms_opt(8, 0, 0).unwrap())
                .and_utc()
        );
    }

    #[tokio::test]
    async fn dispatch_failure_produces_failed_outcome() {
        let h = harness_with(ProbeHandler {
            fail: true,
            ..ProbeHandler::default()
        });
        let outcome = h.processor.process_record(record(&payload(4)), daytime()).await;

        let Outcome::Processed(n) = outcome else {
            panic!("expected a processed outcome");
        };
        assert_eq!(n.status, NotificationStatus::Failed);
        let error = n.error_message.expect("failure carries an error message");
        assert!(error.contains("simulated outage"));
        // No sent marker: a redelivery must be allowed to retry.
        assert_eq!(
            h.dedup.classify(4, NotificationChannel::Email).await,
            Classification::Fresh
        );
    }

    #[tokio::test]
    async fn slow_handler_is_treated_as_a_delivery_failure() {
        let h = harness_with(ProbeHandler {
            stall: Some(Duration::from_secs(5)),
            ..ProbeHandler::default()
        });
        let outcome = h.processor.process_record(record(&payload(5)), daytime()).await;

        let Outcome::Processed(n) = outcome else {
            panic!("expected a processed outcome");
        };
        assert_eq!(n.status, NotificationStatus::Failed);
        assert!(n.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unregistered_channel_fails_the_record_not_the_batch() {
        let h = harness();
        let sms = r#"{"billId": 6, "userId": 7, "notificationType": "SMS", "recipientPhone": "010-1"}"#;
        let outcome = h.processor.process_record(record(sms), daytime()).await;

        let Outcome::Processed(n) = outcome else {
            panic!("expected a processed outcome");
        };
        assert_eq!(n.status, NotificationStatus::Failed);
        assert!(n.error_message.unwrap().contains("No handler registered"));
    }

    #[tokio::test]
    async fn malformed_payload_does_not_block_the_rest_of_the_batch() {
        let h = harness();
        let records = vec![
            record("{definitely not json"),
            record(&payload(7)),
            record(&payload(8)),
        ];

        let (outcomes, summary) = h.processor.fan_out(records, daytime()).await;

        assert_eq!(summary.received, 3);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.sent, 2);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|n| n.status == NotificationStatus::Sent));
    }

    #[test]
    fn duplicate_identities_collapse_to_one_row_preferring_sent() {
        let mk = |status: NotificationStatus| NewNotification {
            user_id: 7,
            bill_id: 10,
            notification_type: "EMAIL".to_string(),
            status,
            recipient: "user@example.com".to_string(),
            content: "body".to_string(),
            scheduled_at: daytime(),
            sent_at: None,
            error_message: None,
        };

        let collapsed = collapse_by_identity(vec![
            mk(NotificationStatus::Sent),
            mk(NotificationStatus::Failed),
        ]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].status, NotificationStatus::Sent);

        let collapsed = collapse_by_identity(vec![
            mk(NotificationStatus::Failed),
            mk(NotificationStatus::Sent),
        ]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn unknown_channel_tag_is_dropped_as_poison() {
        let h = harness();
        let bad = r#"{"billId": 9, "userId": 7, "notificationType": "CARRIER_PIGEON"}"#;
        let outcome = h.processor.process_record(record(bad), daytime()).await;
        assert_matches!(outcome, Outcome::Dropped);
    }
}
