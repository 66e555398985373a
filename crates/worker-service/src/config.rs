//! Environment-driven configuration (spec.md §6).
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server_port: u16,
    pub stream_backend_url: String,
    pub consumer_group: String,
    pub consumer_name: Option<String>,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub log_level: String,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
        }

        Self {
            server_port: std::env::var("WORKER_SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3002),
            stream_backend_url: std::env::var("STREAM_BACKEND_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            consumer_group: std::env::var("CONSUMER_GROUP").unwrap_or_else(|_| "evp-workers-group".to_string()),
            consumer_name: std::env::var("CONSUMER_NAME").ok(),
            batch_size: std::env::var("WORKER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(crate::BATCH_SIZE),
            batch_timeout: std::env::var("WORKER_BATCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(crate::BATCH_TIMEOUT),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
