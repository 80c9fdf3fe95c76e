use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billcast_api::config::ServerConfig;
use billcast_api::{router, state::AppState};
use billcast_notify::handler::{EmailConfig, EmailHandler, HandlerRegistry, PushHandler, SmsHandler};
use billcast_notify::{
    BatchProcessor, BillingEventConsumer, DeadLetterConsumer, NotifyConfig, RedisDedupCache,
    RedisWaitingQueue, RetryRouter, RetryScheduler, WaitingQueueScheduler,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "billcast_api=debug,billcast_notify=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let server_config = ServerConfig::from_env();
    let notify_config = NotifyConfig::from_env();
    tracing::info!(host = %server_config.host, port = %server_config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = billcast_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    billcast_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    billcast_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Redis (dedup cache + waiting queue) ---
    let redis_client =
        redis::Client::open(notify_config.redis_url.clone()).expect("Invalid REDIS_URL");
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .expect("Failed to connect to Redis");
    tracing::info!("Redis connection manager created");

    let dedup = Arc::new(RedisDedupCache::new(
        redis_conn.clone(),
        notify_config.sent_marker_ttl,
    ));
    let queue = Arc::new(RedisWaitingQueue::new(redis_conn));

    // --- Channel handlers ---
    let mut registry = HandlerRegistry::new();
    if let Some(email_config) = EmailConfig::from_env() {
        registry.register(
            billcast_core::NotificationChannel::Email,
            Arc::new(EmailHandler::new(email_config)),
        );
    }
    if let Some(sms) = SmsHandler::from_env() {
        registry.register(billcast_core::NotificationChannel::Sms, Arc::new(sms));
    }
    if let Some(push) = PushHandler::from_env() {
        registry.register(billcast_core::NotificationChannel::Push, Arc::new(push));
    }
    let registry = Arc::new(registry);

    let available = registry.list_available();
    if available.is_empty() {
        tracing::warn!("No channel handlers configured; every dispatch will fail");
    } else {
        tracing::info!(channels = ?available, "Notification handlers registered");
    }

    // --- Pipeline ---
    let retry_router =
        Arc::new(RetryRouter::new(&notify_config).expect("Failed to create Kafka producer"));

    let processor = BatchProcessor::new(
        pool.clone(),
        Arc::clone(&registry),
        dedup.clone(),
        queue.clone(),
        Some(retry_router),
        notify_config.worker_pool_size,
        notify_config.handler_timeout,
        notify_config.system_quiet_window,
    );

    let cancel = CancellationToken::new();

    // Billing event consumer.
    let consumer = BillingEventConsumer::new(&notify_config, processor.clone())
        .expect("Failed to create billing event consumer");
    let consumer_handle = tokio::spawn(consumer.run(cancel.child_token()));

    // Dead letter consumer.
    let dlt_consumer = DeadLetterConsumer::new(&notify_config, pool.clone())
        .expect("Failed to create dead letter consumer");
    let dlt_handle = tokio::spawn(dlt_consumer.run(cancel.child_token()));

    // Waiting queue drain.
    let queue_scheduler = WaitingQueueScheduler::new(
        queue.clone(),
        processor.clone(),
        notify_config.drain_interval,
        notify_config.drain_limit,
    );
    let drain_cancel = cancel.child_token();
    let drain_handle = tokio::spawn(async move { queue_scheduler.run(drain_cancel).await });

    // Periodic retry rescan.
    let retry_scheduler = Arc::new(RetryScheduler::new(
        pool.clone(),
        Arc::clone(&registry),
        dedup.clone(),
        &notify_config,
    ));
    let rescan = Arc::clone(&retry_scheduler);
    let rescan_cancel = cancel.child_token();
    let rescan_handle = tokio::spawn(async move { rescan.run(rescan_cancel).await });

    tracing::info!("Pipeline services started (consumer, dead letter, queue drain, retry rescan)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(server_config.clone()),
        queue,
        retry: retry_scheduler,
        registry,
        system_window: notify_config.system_quiet_window,
        max_retries: notify_config.max_retries,
    };

    // --- CORS ---
    let cors = build_cors_layer(&server_config);

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(router::health_router())
        // API v1 routes.
        .nest("/api/v1", router::api_routes())
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Request timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server_config.request_timeout_secs),
        ))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // CORS.
        .layer(cors)
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        server_config.host.parse().expect("Invalid HOST address"),
        server_config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), consumer_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), dlt_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), drain_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), rescan_handle).await;
    tracing::info!("Pipeline services shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid, which is the
/// desired behaviour -- we want misconfiguration to fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
