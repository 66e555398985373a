//! Shared domain types for the event ingestion and processing pipeline:
//! the event envelope, its validation rules, and the stream/dead-letter
//! record shapes every other crate in this workspace builds on.
pub mod event;
pub mod model;

pub use event::{generate_event_id, Event, EventInput, EVENT_TYPE_RE};
pub use model::{DeadLetterRecord, GroupInfo, PendingEntry, StreamEntry};

/// Dedup records are never materialized as a Rust type — they live entirely
/// in the dedup backend as a `SET key sentinel NX EX 600`-style claim. The
/// "value" is a sentinel the caller never reads back; only the atomic
/// presence check (`TryClaim`) matters. See `dedup::DedupIndex`.
pub const DEDUP_TTL_SECS: u64 = 600;

/// Batch size ceiling enforced by `IngestBatch` (§4.4).
pub const MAX_INGEST_BATCH_SIZE: usize = 1000;
