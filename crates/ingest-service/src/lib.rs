//! C4 Ingestion Service: validate, dedup, append, count. No synchronous
//! EventStore writes ever happen on this path (spec.md §4.4's latency
//! budget is p95 ≤ 50ms).
pub mod auth;
pub mod config;
pub mod obs;

use chrono::Utc;
use dedup::{ClaimOutcome, DedupIndex};
use event_stream::EventStream;
use metrics::MetricsCounters;
use pipeline_core::{Event, EventInput, MAX_INGEST_BATCH_SIZE};
use std::sync::Arc;
use validator::Validate;

pub const STREAM_NAME: &str = "events_stream";

#[derive(Debug, Clone, serde::Serialize)]
pub struct Accepted {
    pub event_id: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Duplicate {
    pub event_id: String,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Accepted(Accepted),
    Duplicate(Duplicate),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectedEvent {
    pub reason: String,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct BatchReport {
    pub accepted_ids: Vec<String>,
    pub duplicate_count: usize,
    pub rejected: Vec<RejectedEvent>,
}

pub struct IngestService {
    dedup: Arc<dyn DedupIndex>,
    stream: Arc<dyn EventStream>,
    metrics: Arc<dyn MetricsCounters>,
    group: String,
}

impl IngestService {
    pub fn new(
        dedup: Arc<dyn DedupIndex>,
        stream: Arc<dyn EventStream>,
        metrics: Arc<dyn MetricsCounters>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            dedup,
            stream,
            metrics,
            group: group.into(),
        }
    }

    /// spec.md §4.4 single-ingest algorithm: validate, assign id, claim
    /// dedup, append, count.
    pub async fn ingest(
        &self,
        input: EventInput,
        source_user_id: String,
    ) -> Result<IngestOutcome, error_handling::IngestError> {
        input
            .validate()
            .map_err(|e| error_handling::IngestError::Validation(e.to_string()))?;

        let event = Event::from_input(input, source_user_id, Utc::now());

        let claim = self
            .dedup
            .try_claim(&event.event_id)
            .await
            .map_err(|e| error_handling::IngestError::Ingestion(e.to_string()))?;

        if claim == ClaimOutcome::Duplicate {
            self.metrics.inc_ingested(0, 1).await;
            return Ok(IngestOutcome::Duplicate(Duplicate {
                event_id: event.event_id,
            }));
        }

        self.stream
            .append(STREAM_NAME, &event.to_stream_fields())
            .await
            .map_err(|e| error_handling::IngestError::Ingestion(e.to_string()))?;

        self.metrics.inc_ingested(1, 0).await;

        Ok(IngestOutcome::Accepted(Accepted {
            event_id: event.event_id,
        }))
    }

    /// spec.md §4.4 batch algorithm: batch dedup, then pipeline appends.
    /// Events that fail to append after a successful dedup claim are
    /// `Rejected`, not credited in counters (spec.md §9's first open
    /// question resolution).
    pub async fn ingest_batch(
        &self,
        inputs: Vec<EventInput>,
        source_user_id: String,
    ) -> Result<BatchReport, error_handling::IngestError> {
        if inputs.is_empty() || inputs.len() > MAX_INGEST_BATCH_SIZE {
            return Err(error_handling::IngestError::Validation(format!(
                "batch size must be between 1 and {}",
                MAX_INGEST_BATCH_SIZE
            )));
        }

        let mut report = BatchReport::default();
        let mut candidates = Vec::with_capacity(inputs.len());

        for input in inputs {
            if let Err(e) = input.validate() {
                report.rejected.push(RejectedEvent { reason: e.to_string() });
                continue;
            }
            candidates.push(Event::from_input(input, source_user_id.clone(), Utc::now()));
        }

        if candidates.is_empty() {
            return Ok(report);
        }

        let ids: Vec<String> = candidates.iter().map(|e| e.event_id.clone()).collect();
        let (new_ids, duplicate_count) = self
            .dedup
            .batch_try_claim(&ids)
            .await
            .map_err(|e| error_handling::IngestError::Ingestion(e.to_string()))?;
        report.duplicate_count += duplicate_count;

        let new_set: std::collections::HashSet<&String> = new_ids.iter().collect();
        let to_append: Vec<Event> = candidates.into_iter().filter(|e| new_set.contains(&e.event_id)).collect();

        let fields_batch: Vec<Vec<(String, String)>> = to_append.iter().map(|e| e.to_stream_fields()).collect();
        let mut accepted = 0u64;
        match self.stream.append_batch(STREAM_NAME, &fields_batch).await {
            Ok(_) => {
                for event in to_append {
                    report.accepted_ids.push(event.event_id);
                    accepted += 1;
                }
            }
            Err(e) => {
                for event in to_append {
                    report.rejected.push(RejectedEvent {
                        reason: format!("stream append_batch failed for event_id={}: {}", event.event_id, e),
                    });
                }
            }
        }

        self.metrics.inc_ingested(accepted, duplicate_count as u64).await;

        Ok(report)
    }

    pub async fn rate_ingest(&self) -> f64 {
        self.metrics.rate_ingest().await
    }

    pub async fn total_ingested(&self) -> u64 {
        self.metrics.total_ingested().await
    }

    pub async fn ensure_group(&self) -> Result<(), error_handling::IngestError> {
        self.stream
            .ensure_group(STREAM_NAME, &self.group)
            .await
            .map_err(|e| error_handling::IngestError::Ingestion(e.to_string()))
    }
}
