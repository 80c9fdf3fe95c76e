//! Pipeline configuration loaded from environment variables.

use std::time::Duration;

use billcast_core::policy::QuietWindow;
use chrono::NaiveTime;

/// Default number of concurrent dispatch workers per batch.
///
/// Deliberately decoupled from the partition count: this bounds the
/// number of simultaneous outbound connections to delivery providers.
const DEFAULT_WORKER_POOL_SIZE: usize = 50;

/// Default maximum records accumulated into one batch.
const DEFAULT_BATCH_MAX_SIZE: usize = 200;

/// Default time to wait for more records once a batch has started.
const DEFAULT_BATCH_LINGER_MS: u64 = 500;

/// Default per-call timeout for a single handler dispatch.
const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 10;

/// Default retry bound before a message is dead-lettered.
const DEFAULT_MAX_RETRIES: i32 = 3;

/// Default TTL for the `sent:` dedup marker.
const DEFAULT_SENT_MARKER_TTL_SECS: u64 = 24 * 3600;

/// Default waiting-queue drain interval.
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 60;

/// Default maximum entries released per drain pass.
const DEFAULT_DRAIN_LIMIT: usize = 100;

/// Default interval for the FAILED-record rescan.
const DEFAULT_RETRY_SCAN_INTERVAL_SECS: u64 = 300;

/// Default maximum records re-dispatched per rescan pass.
const DEFAULT_RETRY_SCAN_LIMIT: i64 = 100;

/// Configuration for the notification pipeline.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Kafka bootstrap servers.
    pub kafka_brokers: String,
    /// Topic carrying billing events.
    pub billing_topic: String,
    /// Dead-letter topic for messages that exhausted their retries.
    pub dead_letter_topic: String,
    /// Consumer group for the billing event consumer.
    pub consumer_group: String,
    /// Consumer group for the dead-letter consumer.
    pub dead_letter_group: String,
    /// Redis connection URL (dedup keys and waiting queue).
    pub redis_url: String,
    /// Size of the bounded dispatch worker pool.
    pub worker_pool_size: usize,
    /// Maximum records per consumed batch.
    pub batch_max_size: usize,
    /// How long to keep accumulating once a batch has started.
    pub batch_linger: Duration,
    /// Per-call timeout for a single handler dispatch.
    pub handler_timeout: Duration,
    /// Retry bound; a message failing this many attempts is dead-lettered.
    pub max_retries: i32,
    /// TTL for the `sent:` dedup marker.
    pub sent_marker_ttl: Duration,
    /// Waiting-queue drain interval.
    pub drain_interval: Duration,
    /// Maximum waiting-queue entries released per drain pass.
    pub drain_limit: usize,
    /// Interval for the periodic FAILED-record rescan.
    pub retry_scan_interval: Duration,
    /// Maximum records re-dispatched per rescan pass.
    pub retry_scan_limit: i64,
    /// System-wide quiet window applied when a user has no preference.
    pub system_quiet_window: QuietWindow,
}

impl NotifyConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default               |
    /// |----------------------------|-----------------------|
    /// | `KAFKA_BROKERS`            | `localhost:9092`      |
    /// | `BILLING_TOPIC`            | `billing-event`       |
    /// | `DEAD_LETTER_TOPIC`        | `billing-event.DLT`   |
    /// | `CONSUMER_GROUP`           | `notification-group`  |
    /// | `DEAD_LETTER_GROUP`        | `dlq-group`           |
    /// | `REDIS_URL`                | `redis://localhost:6379` |
    /// | `WORKER_POOL_SIZE`         | `50`                  |
    /// | `BATCH_MAX_SIZE`           | `200`                 |
    /// | `BATCH_LINGER_MS`          | `500`                 |
    /// | `HANDLER_TIMEOUT_SECS`     | `10`                  |
    /// | `MAX_RETRIES`              | `3`                   |
    /// | `SENT_MARKER_TTL_SECS`     | `86400`               |
    /// | `DRAIN_INTERVAL_SECS`      | `60`                  |
    /// | `DRAIN_LIMIT`              | `100`                 |
    /// | `RETRY_SCAN_INTERVAL_SECS` | `300`                 |
    /// | `RETRY_SCAN_LIMIT`         | `100`                 |
    /// | `SYSTEM_QUIET_START`       | `22:00`               |
    /// | `SYSTEM_QUIET_END`         | `08:00`               |
    pub fn from_env() -> Self {
        let system_default = QuietWindow::system_default();
        let quiet_start = env_time("SYSTEM_QUIET_START").unwrap_or(system_default.start);
        let quiet_end = env_time("SYSTEM_QUIET_END").unwrap_or(system_default.end);

        Self {
            kafka_brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
            billing_topic: env_or("BILLING_TOPIC", "billing-event"),
            dead_letter_topic: env_or("DEAD_LETTER_TOPIC", "billing-event.DLT"),
            consumer_group: env_or("CONSUMER_GROUP", "notification-group"),
            dead_letter_group: env_or("DEAD_LETTER_GROUP", "dlq-group"),
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            worker_pool_size: env_parsed("WORKER_POOL_SIZE", DEFAULT_WORKER_POOL_SIZE),
            batch_max_size: env_parsed("BATCH_MAX_SIZE", DEFAULT_BATCH_MAX_SIZE),
            batch_linger: Duration::from_millis(env_parsed(
                "BATCH_LINGER_MS",
                DEFAULT_BATCH_LINGER_MS,
            )),
            handler_timeout: Duration::from_secs(env_parsed(
                "HANDLER_TIMEOUT_SECS",
                DEFAULT_HANDLER_TIMEOUT_SECS,
            )),
            max_retries: env_parsed("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            sent_marker_ttl: Duration::from_secs(env_parsed(
                "SENT_MARKER_TTL_SECS",
                DEFAULT_SENT_MARKER_TTL_SECS,
            )),
            drain_interval: Duration::from_secs(env_parsed(
                "DRAIN_INTERVAL_SECS",
                DEFAULT_DRAIN_INTERVAL_SECS,
            )),
            drain_limit: env_parsed("DRAIN_LIMIT", DEFAULT_DRAIN_LIMIT),
            retry_scan_interval: Duration::from_secs(env_parsed(
                "RETRY_SCAN_INTERVAL_SECS",
                DEFAULT_RETRY_SCAN_INTERVAL_SECS,
            )),
            retry_scan_limit: env_parsed("RETRY_SCAN_LIMIT", DEFAULT_RETRY_SCAN_LIMIT),
            system_quiet_window: QuietWindow::new(quiet_start, quiet_end),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_time(key: &str) -> Option<NaiveTime> {
    let raw = std::env::var(key).ok()?;
    match NaiveTime::parse_from_str(&raw, "%H:%M") {
        Ok(t) => Some(t),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable quiet window bound");
            None
        }
    }
}
