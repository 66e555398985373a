use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use credential_store::InMemoryCredentialStore;
use dedup::RedisDedupIndex;
use event_stream::RedisEventStream;
use ingest_service::auth::{ApiKeyAuth, AuthenticatedUser};
use ingest_service::config::IngestConfig;
use ingest_service::obs::{metrics_handler, HttpMetrics};
use ingest_service::{IngestOutcome, IngestService};
use metrics::RedisMetricsCounters;
use pipeline_core::{EventInput, MAX_INGEST_BATCH_SIZE};
use redis_utils::RedisPool;
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn post_event(
    service: web::Data<Arc<IngestService>>,
    user: AuthenticatedUser,
    input: web::Json<EventInput>,
) -> actix_web::Result<HttpResponse> {
    let outcome = service.ingest(input.into_inner(), user.user_id).await?;
    Ok(match outcome {
        IngestOutcome::Accepted(a) => HttpResponse::Accepted().json(serde_json::json!({
            "success": true,
            "data": {"event_id": a.event_id, "accepted": true, "duplicate": false}
        })),
        IngestOutcome::Duplicate(d) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "data": {"event_id": d.event_id, "accepted": false, "duplicate": true}
        })),
    })
}

#[derive(Deserialize)]
struct BatchBody {
    events: Vec<EventInput>,
}

async fn post_event_batch(
    service: web::Data<Arc<IngestService>>,
    user: AuthenticatedUser,
    body: web::Json<BatchBody>,
) -> actix_web::Result<HttpResponse> {
    let events = body.into_inner().events;
    if events.is_empty() || events.len() > MAX_INGEST_BATCH_SIZE {
        return Err(error_handling::IngestError::Validation(format!(
            "batch size must be between 1 and {}",
            MAX_INGEST_BATCH_SIZE
        ))
        .into());
    }

    let report = service.ingest_batch(events, user.user_id).await?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "accepted": report.accepted_ids.len(),
        "duplicates": report.duplicate_count,
        "total": report.accepted_ids.len() + report.duplicate_count + report.rejected.len(),
        "event_ids": report.accepted_ids,
    })))
}

async fn get_stats(service: web::Data<Arc<IngestService>>, _user: AuthenticatedUser) -> HttpResponse {
    let rate = service.rate_ingest().await;
    HttpResponse::Ok().json(serde_json::json!({
        "ingestion_rate": rate,
        "total_ingested": service.total_ingested().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

async fn ready(stream_manager: web::Data<redis_utils::SharedConnectionManager>) -> HttpResponse {
    let mut conn = stream_manager.lock().await;
    match redis::cmd("PING").query_async::<_, String>(&mut *conn).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"status": "ready"})),
        Err(err) => HttpResponse::ServiceUnavailable().json(serde_json::json!({"status": "not_ready", "error": err.to_string()})),
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let config = IngestConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting ingest-service on port {}", config.server_port);

    let stream_pool = RedisPool::connect(&config.stream_backend_url)
        .await
        .context("failed to connect to stream backend")?;
    let dedup_pool = RedisPool::connect(&config.dedup_backend_url)
        .await
        .context("failed to connect to dedup backend")?;

    let event_stream = Arc::new(RedisEventStream::new(stream_pool.manager()));
    let dedup_index = Arc::new(RedisDedupIndex::new(dedup_pool.manager()));
    let metrics_counters = Arc::new(RedisMetricsCounters::new(stream_pool.manager()));

    // CredentialStore is an external collaborator out of scope per spec
    // (§1); this in-memory stand-in satisfies the contract until a real
    // credential service is wired in via CREDENTIAL_STORE_URL.
    let credential_store: Arc<dyn credential_store::CredentialStore> = Arc::new(InMemoryCredentialStore::new());

    let service = Arc::new(IngestService::new(
        dedup_index,
        event_stream,
        metrics_counters,
        config.consumer_group.clone(),
    ));
    service.ensure_group().await.context("failed to ensure consumer group")?;

    let server_port = config.server_port;
    let ready_manager = stream_pool.manager();

    HttpServer::new(move || {
        App::new()
            .wrap(HttpMetrics)
            .app_data(web::Data::new(service.clone()))
            .app_data(web::Data::new(ready_manager.clone()))
            .route("/v1/health", web::get().to(health))
            .route("/v1/ready", web::get().to(ready))
            .route("/metrics", web::get().to(metrics_handler))
            .service(
                web::scope("/v1/events")
                    .wrap(ApiKeyAuth::new(credential_store.clone()))
                    .route("", web::post().to(post_event))
                    .route("/batch", web::post().to(post_event_batch))
                    .route("/stats", web::get().to(get_stats)),
            )
    })
    .bind(("0.0.0.0", server_port))
    .context("failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error")
}
