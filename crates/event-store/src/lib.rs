//! Trait-only contract for the document store the worker bulk-writes into.
//! The real store (a sharded document collection, see spec.md §6) is
//! explicitly out of scope for this repo; only the contract and an
//! in-memory test double live here.
use async_trait::async_trait;
use pipeline_core::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("bulk insert failed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A unique-key conflict on `event_id` — idempotent success, not an
    /// error (spec.md §6's EventStore contract).
    AlreadyPersisted,
}

#[derive(Debug)]
pub struct BulkInsertReport {
    pub outcomes: Vec<(String, InsertOutcome)>,
}

/// `bulk_insert` is the only operation the worker needs: `ordered=false`
/// semantics where a subset of per-document unique-key conflicts still
/// counts as overall success (those conflicts are reported as
/// `AlreadyPersisted`, not failures).
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn bulk_insert(&self, events: &[Event]) -> Result<BulkInsertReport, EventStoreError>;
}

/// In-memory double used by worker-service's integration tests. Can be
/// toggled to fail every write, to exercise the permanent-downstream-failure
/// scenario (spec.md §8 S6) without a real document store.
pub struct InMemoryEventStore {
    docs: Mutex<HashMap<String, Event>>,
    fail_all: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            fail_all: AtomicBool::new(false),
        }
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn contains(&self, event_id: &str) -> bool {
        self.docs.lock().await.contains_key(event_id)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn bulk_insert(&self, events: &[Event]) -> Result<BulkInsertReport, EventStoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(EventStoreError::WriteFailed("simulated downstream outage".to_string()));
        }

        let mut docs = self.docs.lock().await;
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            if docs.contains_key(&event.event_id) {
                outcomes.push((event.event_id.clone(), InsertOutcome::AlreadyPersisted));
            } else {
                docs.insert(event.event_id.clone(), event.clone());
                outcomes.push((event.event_id.clone(), InsertOutcome::Inserted));
            }
        }
        Ok(BulkInsertReport { outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            user_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            event_type: "page.view".to_string(),
            timestamp: "2026-07-30T12:00:00Z".to_string(),
            priority: 1,
            metadata: None,
            payload: None,
            ingested_at: Utc::now(),
            source_user_id: "owner-1".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_event_id_is_idempotent() {
        let store = InMemoryEventStore::new();
        let event = sample_event("evt_1");

        let first = store.bulk_insert(&[event.clone()]).await.expect("insert");
        assert_eq!(first.outcomes[0].1, InsertOutcome::Inserted);

        let second = store.bulk_insert(&[event]).await.expect("insert");
        assert_eq!(second.outcomes[0].1, InsertOutcome::AlreadyPersisted);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn simulated_outage_fails_every_write() {
        let store = InMemoryEventStore::new();
        store.set_fail_all(true);
        let result = store.bulk_insert(&[sample_event("evt_1")]).await;
        assert!(result.is_err());
    }
}
