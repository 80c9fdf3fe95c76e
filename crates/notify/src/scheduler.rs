//! Periodic drain of the waiting queue.
//!
//! [`WaitingQueueScheduler`] wakes on a fixed interval, reads entries
//! whose release time has passed, and re-injects each one through the
//! [`BatchProcessor`]. An entry is removed only after its re-injection
//! succeeded; entries that come back still blocked were re-deferred with
//! a fresh release time and stay in the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::processor::{BatchProcessor, ReprocessOutcome};
use crate::queue::DeferralQueue;

/// Background task releasing deferred messages when their quiet window
/// has ended.
pub struct WaitingQueueScheduler {
    queue: Arc<dyn DeferralQueue>,
    processor: BatchProcessor,
    interval: Duration,
    limit: usize,
}

impl WaitingQueueScheduler {
    pub fn new(
        queue: Arc<dyn DeferralQueue>,
        processor: BatchProcessor,
        interval: Duration,
        limit: usize,
    ) -> Self {
        Self {
            queue,
            processor,
            interval,
            limit,
        }
    }

    /// Run the drain loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Waiting queue scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.drain_once().await;
                }
            }
        }
    }

    /// One drain pass. Returns the number of entries released.
    pub async fn drain_once(&self) -> usize {
        let ready = match self.queue.drain_ready(self.limit).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::error!(error = %e, "Waiting queue read failed");
                return 0;
            }
        };

        let mut released = 0;
        for payload in ready {
            match self.processor.reprocess(&payload).await {
                Ok(ReprocessOutcome::Deferred) => {
                    // Re-blocked; its queue entry now carries a new
                    // release time and must not be removed.
                }
                Ok(_) => {
                    if let Err(e) = self.queue.remove(&payload).await {
                        tracing::warn!(error = %e, "Failed to remove released entry");
                    }
                    released += 1;
                }
                Err(e) => {
                    // Persistence is down; stop the pass and leave the
                    // remaining entries for the next tick.
                    tracing::error!(error = %e, "Re-injection failed, aborting drain pass");
                    break;
                }
            }
        }

        if released > 0 {
            tracing::info!(released, "Waiting queue drained");
        }
        released
    }
}
