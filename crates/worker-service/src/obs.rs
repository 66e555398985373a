//! Ambient prometheus metrics for the worker process itself: buffer depth,
//! flush counts, dead-letter volume. Distinct from the business counters in
//! the `metrics` crate (those are shared with ingest-service and read back
//! over `/v1/events/stats`); these describe this one worker's own loop.
use actix_web::{web, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};

use crate::Worker;
use std::sync::Arc;

pub static WORKER_BUFFER_LEN: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("worker_service_buffer_len", "Events currently buffered awaiting flush")
        .expect("failed to create worker_service_buffer_len");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register worker_service_buffer_len");
    gauge
});

pub static WORKER_FLUSHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::with_opts(Opts::new("worker_service_flushes_total", "Total flush cycles completed"))
        .expect("failed to create worker_service_flushes_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register worker_service_flushes_total");
    counter
});

pub static WORKER_DLQ_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::with_opts(Opts::new("worker_service_dlq_total", "Total events routed to the dead-letter sink"))
        .expect("failed to create worker_service_dlq_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register worker_service_dlq_total");
    counter
});

pub async fn metrics_handler(worker: web::Data<Arc<Worker>>) -> HttpResponse {
    let stats = worker.stats().await;
    WORKER_BUFFER_LEN.set(stats.buffer_len as i64);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok().content_type(encoder.format_type()).body(buffer)
}

pub async fn stats_handler(worker: web::Data<Arc<Worker>>) -> HttpResponse {
    HttpResponse::Ok().json(worker.stats().await)
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}
