use std::sync::Arc;

use billcast_core::policy::QuietWindow;
use billcast_notify::handler::HandlerRegistry;
use billcast_notify::queue::DeferralQueue;
use billcast_notify::retry::RetryScheduler;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: billcast_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The durable waiting queue, for inspection and clearing.
    pub queue: Arc<dyn DeferralQueue>,
    /// The retry rescan, exposed for manual triggering.
    pub retry: Arc<RetryScheduler>,
    /// Registered channel handlers, for the availability listing.
    pub registry: Arc<HandlerRegistry>,
    /// System-wide quiet window, for policy introspection.
    pub system_window: QuietWindow,
    /// Retry bound, for the failed-count query.
    pub max_retries: i32,
}
