use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A durable append-only log record. `entry_id` is monotonic per stream;
/// `fields` is the flat key→value map `Event::to_stream_fields` produces.
/// Delivery bookkeeping (`delivery_count`, `first_delivered_at`,
/// `last_delivered_at`, `owner_consumer`) only has meaning once the entry
/// has been read into a consumer group's pending entry list — a freshly
/// appended, never-read entry carries `None` for all of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub entry_id: String,
    pub fields: Vec<(String, String)>,
    pub delivery_count: u32,
    pub first_delivered_at: Option<DateTime<Utc>>,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub owner_consumer: Option<String>,
}

/// One pending-entry-list row: which consumer currently owns a delivered
/// entry, how long it's been idle, and how many times it's been delivered.
/// `ClaimIdle` reassigns `consumer` and increments `delivery_count` for rows
/// whose `idle_ms` has crossed the caller's threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entry_id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u32,
}

/// A consumer group's membership snapshot, as returned by `EventStream::info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub length: u64,
    pub pending_count: u64,
    pub consumers: Vec<String>,
}

/// A durably recorded processing failure. `original_event_id` carries a
/// unique index so a redelivery-triggered reprocessing attempt that fails
/// again is a no-op, not a duplicate dead letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_event_id: String,
    pub user_id: String,
    pub original_event_payload: Value,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
    pub stream_entry_id: String,
}
