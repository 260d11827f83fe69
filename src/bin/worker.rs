use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use marketplace_sync::{
    app_state,
    config::AppConfig,
    db::{self, postgres::PgStore},
    routes,
    services::{
        circuit_breaker::CircuitBreaker,
        clock::SystemClock,
        events::RedisEventSink,
        platform::{HttpPlatformAdapter, PlatformAdapter},
        queue::JobQueue,
        worker::WorkerPool,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting marketplace sync worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    for warning in config.warnings() {
        tracing::warn!(%warning, "Suspicious queue configuration");
    }

    // Exposed on its own port so the API's /metrics is not shadowed.
    if let Some(addr) = config.worker_metrics_addr.as_deref() {
        let addr: std::net::SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        routes::metrics::describe();
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    let redis_events = config
        .redis_url
        .as_deref()
        .map(|url| Arc::new(RedisEventSink::new(url).expect("Invalid REDIS_URL")));
    let events = app_state::event_sink(redis_events.as_ref());

    let queue = Arc::new(JobQueue::new(
        Arc::new(PgStore::new(db_pool)),
        events.clone(),
        Arc::new(SystemClock),
        config.queue_config(),
    ));

    let breaker = Arc::new(CircuitBreaker::new(config.circuit_config()).with_events(events));

    let worker_config = config.worker_config();
    let adapter: Arc<dyn PlatformAdapter> = Arc::new(
        HttpPlatformAdapter::new(&config.platform_base_url, worker_config.job_timeout)
            .expect("Failed to build platform HTTP client"),
    );

    let prefix = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let pool = WorkerPool::start(queue, breaker, adapter, worker_config, &prefix);

    tracing::info!("Worker ready, waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown requested, draining in-flight jobs");
    pool.shutdown().await;
}
