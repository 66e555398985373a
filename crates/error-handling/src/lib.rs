//! Unified error handling library for Nova microservices
//!
//! Provides consistent error types, conversion helpers, and HTTP response formatting

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard error response for all services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub error_type: String,
    pub code: String,
    pub details: Option<String>,
    pub timestamp: String,
}

/// Error kinds surfaced on the ingestion HTTP path. These carry the exact
/// `code` strings the external interface promises callers (validation
/// errors are never retried, auth errors are stable, ingestion errors mean
/// the dedup backend could not be reached and the event was never
/// admitted).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing x-api-key header")]
    MissingApiKey,

    #[error("invalid or revoked api key")]
    InvalidApiKey,

    #[error("ingestion error: {0}")]
    Ingestion(String),
}

impl IngestError {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::Validation(_) => 400,
            IngestError::MissingApiKey | IngestError::InvalidApiKey => 401,
            IngestError::Ingestion(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "VALIDATION_ERROR",
            IngestError::MissingApiKey => "MISSING_API_KEY",
            IngestError::InvalidApiKey => "INVALID_API_KEY",
            IngestError::Ingestion(_) => "INGESTION_ERROR",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            status: self.status_code(),
            error_type: self.code().to_string(),
            code: self.code().to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl actix_web::ResponseError for IngestError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(IngestError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(actix_web::ResponseError::status_code(self)).json(self.to_response())
    }
}

/// Infrastructure failure kinds for the worker path (§7). Transient errors
/// are retried with backoff; permanent per-document errors (other than a
/// unique-key conflict, which is idempotent success) route the event to the
/// dead-letter sink; fatal errors are logged and the stream entry is left
/// unacked so it is redelivered.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("transient infrastructure error: {0}")]
    Transient(String),

    #[error("permanent infrastructure error: {0}")]
    Permanent(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl InfraError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InfraError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_error_codes_match_external_contract() {
        assert_eq!(IngestError::Validation("bad".into()).code(), "VALIDATION_ERROR");
        assert_eq!(IngestError::Validation("bad".into()).status_code(), 400);
        assert_eq!(IngestError::MissingApiKey.code(), "MISSING_API_KEY");
        assert_eq!(IngestError::MissingApiKey.status_code(), 401);
        assert_eq!(IngestError::InvalidApiKey.code(), "INVALID_API_KEY");
        assert_eq!(IngestError::Ingestion("down".into()).code(), "INGESTION_ERROR");
        assert_eq!(IngestError::Ingestion("down".into()).status_code(), 500);
    }

    #[test]
    fn infra_error_retryability() {
        assert!(InfraError::Transient("timeout".into()).is_retryable());
        assert!(!InfraError::Permanent("schema".into()).is_retryable());
        assert!(!InfraError::Fatal("dlq down".into()).is_retryable());
    }
}
