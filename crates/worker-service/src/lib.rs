//! C5 Worker: claim, parse, buffer, bulk-write, ack. The hardest part of
//! the pipeline (spec.md §4.5) — batching, backpressure via the
//! `processing` gate, retry-then-DLQ, stale-claim reclaim.
pub mod config;
pub mod obs;

use dlq::DlqSink;
use event_stream::EventStream;
use event_store::{EventStore, InsertOutcome};
use metrics::MetricsCounters;
use pipeline_core::{DeadLetterRecord, Event};
use rand::RngCore;
use resilience::{with_retry, RetryConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

pub const STREAM_NAME: &str = "events_stream";

pub const READ_COUNT: usize = 50;
pub const BATCH_SIZE: usize = 100;
pub const BATCH_TIMEOUT: Duration = Duration::from_millis(500);
pub const CLAIM_INTERVAL: Duration = Duration::from_secs(30);
pub const STALE_AGE_MS: u64 = 60_000;
pub const READ_BLOCK_MS: u64 = 100;
pub const ERROR_BACKOFF: Duration = Duration::from_secs(2);
pub const PROCESSING_POLL: Duration = Duration::from_millis(50);
pub const SHUTDOWN_ENVELOPE: Duration = Duration::from_secs(5);

/// `worker-<hostname>-<pid>-<6 hex chars>`. The random suffix makes
/// accidental collisions between two workers on the same host negligible;
/// a collision would corrupt PEL ownership.
pub fn generate_consumer_id() -> String {
    let hostname = hostname_or_unknown();
    let pid = std::process::id();
    let mut suffix_bytes = [0u8; 3];
    rand::rng().fill_bytes(&mut suffix_bytes);
    format!("worker-{}-{}-{}", hostname, pid, hex::encode(suffix_bytes))
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// A point-in-time view of a worker's internal state, exposed over
/// `/metrics`/`/v1/worker/stats` (SPEC_FULL.md §4).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub consumer_id: String,
    pub buffer_len: usize,
    pub last_flush_at: Option<chrono::DateTime<chrono::Utc>>,
    pub processed_total: u64,
    pub failed_total: u64,
    pub dlq_total: u64,
}

struct Shared {
    buffer_len: AtomicUsize,
    processed_total: AtomicUsize,
    failed_total: AtomicUsize,
    dlq_total: AtomicUsize,
    last_flush_at: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            buffer_len: AtomicUsize::new(0),
            processed_total: AtomicUsize::new(0),
            failed_total: AtomicUsize::new(0),
            dlq_total: AtomicUsize::new(0),
            last_flush_at: Mutex::new(None),
        }
    }
}

pub struct Worker {
    stream: Arc<dyn EventStream>,
    store: Arc<dyn EventStore>,
    dlq: Arc<dyn DlqSink>,
    metrics: Arc<dyn MetricsCounters>,
    group: String,
    consumer_id: String,
    batch_size: usize,
    batch_timeout: Duration,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        stream: Arc<dyn EventStream>,
        store: Arc<dyn EventStore>,
        dlq: Arc<dyn DlqSink>,
        metrics: Arc<dyn MetricsCounters>,
        group: impl Into<String>,
        consumer_id: impl Into<String>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            store,
            dlq,
            metrics,
            group: group.into(),
            consumer_id: consumer_id.into(),
            batch_size,
            batch_timeout,
            shared: Arc::new(Shared::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub async fn stats(&self) -> Stats {
        Stats {
            consumer_id: self.consumer_id.clone(),
            buffer_len: self.shared.buffer_len.load(Ordering::SeqCst),
            last_flush_at: *self.shared.last_flush_at.lock().await,
            processed_total: self.shared.processed_total.load(Ordering::SeqCst) as u64,
            failed_total: self.shared.failed_total.load(Ordering::SeqCst) as u64,
            dlq_total: self.shared.dlq_total.load(Ordering::SeqCst) as u64,
        }
    }

    pub async fn ensure_group(&self) -> Result<(), event_stream::EventStreamError> {
        self.stream.ensure_group(STREAM_NAME, &self.group).await
    }

    /// spec.md §4.5's main loop, adapted from a single-threaded cooperative
    /// scheduler to a single tokio task: the reader, flusher and stale-claim
    /// concerns share this one task, so `processing` never races with
    /// itself. Returns once `stop()` is called and the shutdown envelope
    /// elapses or the loop observes `running = false`.
    pub async fn run(self: Arc<Self>) {
        let mut buffer: Vec<(String, Event)> = Vec::with_capacity(self.batch_size + READ_COUNT);
        let mut last_flush = Instant::now();
        let mut last_claim = Instant::now();
        let mut processing = false;

        while self.running.load(Ordering::SeqCst) {
            if processing {
                tokio::time::sleep(PROCESSING_POLL).await;
                continue;
            }

            if last_claim.elapsed() >= CLAIM_INTERVAL {
                last_claim = Instant::now();
                self.reclaim_stale(&mut buffer).await;
            }

            match self
                .stream
                .read_group(STREAM_NAME, &self.group, &self.consumer_id, READ_COUNT, READ_BLOCK_MS)
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        match Event::from_stream_fields(&entry.fields) {
                            Some(event) => buffer.push((entry.entry_id, event)),
                            None => {
                                warn!(entry_id = %entry.entry_id, "dropping malformed stream entry");
                                let _ = self.stream.acknowledge(STREAM_NAME, &self.group, &[entry.entry_id]).await;
                            }
                        }
                    }
                    self.shared.buffer_len.store(buffer.len(), Ordering::SeqCst);
                }
                Err(err) => {
                    let dropped = buffer.len();
                    if dropped > 0 {
                        warn!(dropped, %err, "read_group failed, dropping buffer to bound memory; entries remain in the PEL for redelivery");
                        buffer.clear();
                        self.shared.buffer_len.store(0, Ordering::SeqCst);
                    } else {
                        error!(%err, "read_group failed, backing off");
                    }
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            }

            let should_flush =
                buffer.len() >= self.batch_size || (!buffer.is_empty() && last_flush.elapsed() >= self.batch_timeout);

            if should_flush {
                processing = true;
                self.flush(&mut buffer).await;
                processing = false;
                last_flush = Instant::now();
                tokio::task::yield_now().await;
            }
        }

        if !buffer.is_empty() {
            info!(count = buffer.len(), "best-effort final flush at shutdown");
            self.flush(&mut buffer).await;
        }
    }

    async fn reclaim_stale(&self, buffer: &mut Vec<(String, Event)>) {
        match self
            .stream
            .claim_idle(STREAM_NAME, &self.group, &self.consumer_id, STALE_AGE_MS, self.batch_size)
            .await
        {
            Ok(entries) => {
                for entry in entries {
                    match Event::from_stream_fields(&entry.fields) {
                        Some(event) => buffer.push((entry.entry_id, event)),
                        None => {
                            let _ = self.stream.acknowledge(STREAM_NAME, &self.group, &[entry.entry_id]).await;
                        }
                    }
                }
                self.shared.buffer_len.store(buffer.len(), Ordering::SeqCst);
            }
            Err(err) => warn!(%err, "claim_idle failed, skipping this cycle"),
        }
    }

    /// spec.md §4.5 step-by-step: bulk insert under retry, ack on success,
    /// DLQ-then-ack on exhaustion, never ack before durability either way.
    async fn flush(&self, buffer: &mut Vec<(String, Event)>) {
        if buffer.is_empty() {
            return;
        }

        let batch: Vec<(String, Event)> = std::mem::take(buffer);
        self.shared.buffer_len.store(0, Ordering::SeqCst);
        crate::obs::WORKER_FLUSHES_TOTAL.inc();

        let entry_ids: Vec<String> = batch.iter().map(|(id, _)| id.clone()).collect();
        let events: Vec<Event> = batch.iter().map(|(_, e)| e.clone()).collect();

        let retry_config = RetryConfig::default();
        let outcome = with_retry("worker.bulk_insert", &retry_config, || {
            let store = self.store.clone();
            let events = events.clone();
            async move { store.bulk_insert(&events).await }
        })
        .await;

        if outcome.success {
            let report = outcome.result.expect("success implies result");
            let already_persisted = report
                .outcomes
                .iter()
                .filter(|(_, outcome)| *outcome == InsertOutcome::AlreadyPersisted)
                .count();
            if already_persisted > 0 {
                info!(already_persisted, batch_size = events.len(), "bulk insert saw prior unique-key conflicts");
            }

            if let Err(err) = self.stream.acknowledge(STREAM_NAME, &self.group, &entry_ids).await {
                warn!(%err, "acknowledge failed after successful bulk insert; entries will redeliver");
            }

            let event_types: Vec<String> = events.iter().map(|e| e.event_type.clone()).collect();
            self.metrics.inc_processed(events.len() as u64, &event_types, 0).await;
            self.shared.processed_total.fetch_add(events.len(), Ordering::SeqCst);
            *self.shared.last_flush_at.lock().await = Some(chrono::Utc::now());
            return;
        }

        let last_error = outcome.error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string());
        let infra_error = error_handling::InfraError::Transient(last_error.clone());
        warn!(
            module = "worker-service",
            consumer_id = %self.consumer_id,
            batch_size = events.len(),
            attempts = outcome.attempts,
            error = %infra_error,
            retryable = infra_error.is_retryable(),
            "bulk insert exhausted retries, routing to dead-letter sink"
        );

        let records: Vec<DeadLetterRecord> = events
            .iter()
            .zip(entry_ids.iter())
            .map(|(event, entry_id)| DeadLetterRecord {
                original_event_id: event.event_id.clone(),
                user_id: event.user_id.clone(),
                original_event_payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
                error_message: last_error.clone(),
                failed_at: chrono::Utc::now(),
                retry_count: outcome.attempts,
                stream_entry_id: entry_id.clone(),
            })
            .collect();

        let dlq_outcome = with_retry("worker.dlq_write", &retry_config, || {
            let dlq = self.dlq.clone();
            let records = records.clone();
            async move { dlq.write(&records).await }
        })
        .await;

        if dlq_outcome.success {
            crate::obs::WORKER_DLQ_TOTAL.inc_by(events.len() as u64);
            if let Err(err) = self.stream.acknowledge(STREAM_NAME, &self.group, &entry_ids).await {
                warn!(%err, "acknowledge failed after dead-letter write; entries will redeliver");
            }
            self.metrics.inc_failed(events.len() as u64).await;
            self.metrics.inc_dlq(events.len() as u64).await;
            self.shared.failed_total.fetch_add(events.len(), Ordering::SeqCst);
            self.shared.dlq_total.fetch_add(events.len(), Ordering::SeqCst);
        } else {
            let dlq_error = dlq_outcome.error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string());
            let fatal = error_handling::InfraError::Fatal(dlq_error);
            error!(
                module = "worker-service",
                consumer_id = %self.consumer_id,
                batch_size = events.len(),
                attempts = dlq_outcome.attempts,
                error = %fatal,
                retryable = fatal.is_retryable(),
                "dead-letter write also failed after retries; leaving entries unacknowledged for redelivery"
            );
        }
        *self.shared.last_flush_at.lock().await = Some(chrono::Utc::now());
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Owns the worker's `run()` task and drives graceful shutdown with the
/// 5s envelope spec.md §4.5 mandates.
pub struct WorkerHandle {
    worker: Arc<Worker>,
    shutdown_tx: watch::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(worker: Arc<Worker>) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(());
        let run_worker = worker.clone();
        let task = tokio::spawn(async move { run_worker.run().await });
        Self {
            worker,
            shutdown_tx,
            task,
        }
    }

    pub async fn stop(self) {
        self.worker.stop();
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(SHUTDOWN_ENVELOPE, self.task).await;
    }

    pub fn worker(&self) -> Arc<Worker> {
        self.worker.clone()
    }
}
