//! Environment-driven configuration (spec.md §6).
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub server_port: u16,
    pub stream_backend_url: String,
    pub dedup_backend_url: String,
    pub credential_store_url: String,
    pub consumer_group: String,
    pub log_level: String,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
        }

        Self {
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3001),
            stream_backend_url: std::env::var("STREAM_BACKEND_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            dedup_backend_url: std::env::var("DEDUP_BACKEND_URL")
                .unwrap_or_else(|_| std::env::var("STREAM_BACKEND_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())),
            credential_store_url: std::env::var("CREDENTIAL_STORE_URL").unwrap_or_default(),
            consumer_group: std::env::var("CONSUMER_GROUP").unwrap_or_else(|_| "evp-workers-group".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
