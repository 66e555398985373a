use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use db_pool::{create_pool, DbConfig};
use dlq::PostgresDlqSink;
use event_store::{EventStore, InMemoryEventStore};
use event_stream::RedisEventStream;
use redis_utils::RedisPool;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker_service::config::WorkerConfig;
use worker_service::obs::{health, metrics_handler, stats_handler};
use worker_service::{generate_consumer_id, Worker, WorkerHandle};

#[actix_web::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let consumer_id = config.consumer_name.clone().unwrap_or_else(generate_consumer_id);
    tracing::info!(consumer_id = %consumer_id, "starting worker-service");

    let stream_pool = RedisPool::connect(&config.stream_backend_url)
        .await
        .context("failed to connect to stream backend")?;
    let event_stream = Arc::new(RedisEventStream::new(stream_pool.manager()));
    let metrics_counters = Arc::new(metrics::RedisMetricsCounters::new(stream_pool.manager()));

    // EventStore is an external collaborator out of scope per spec (§6); this
    // in-memory stand-in satisfies the contract until a real document store
    // is wired in via EVENTSTORE_URL/EVENTSTORE_DB.
    let event_store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());

    let db_config = DbConfig::from_env("worker-service").map_err(anyhow::Error::msg)?;
    let db_pool = create_pool(db_config).await.context("failed to create dead-letter sink pool")?;
    let dlq_sink = PostgresDlqSink::new(db_pool);
    dlq_sink.run_migrations().await.context("failed to run dead-letter sink migrations")?;
    let dlq_sink: Arc<dyn dlq::DlqSink> = Arc::new(dlq_sink);

    let worker = Arc::new(Worker::new(
        event_stream,
        event_store,
        dlq_sink,
        metrics_counters,
        config.consumer_group.clone(),
        consumer_id,
        config.batch_size,
        config.batch_timeout,
    ));
    worker.ensure_group().await.context("failed to ensure consumer group")?;

    let handle = WorkerHandle::spawn(worker.clone());

    let server_port = config.server_port;
    let http_worker = worker.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(http_worker.clone()))
            .route("/v1/worker/health", web::get().to(health))
            .route("/v1/worker/stats", web::get().to(stats_handler))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(("0.0.0.0", server_port))
    .context("failed to bind HTTP server")?
    .run();

    tokio::select! {
        result = server => {
            result.context("HTTP server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, draining buffer");
        }
    }

    handle.stop().await;
    Ok(())
}
