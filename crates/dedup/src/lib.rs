//! C1 Dedup Index: the idempotency gate every ingested event passes
//! through before it is ever appended to the stream. `TryClaim` and
//! `BatchTryClaim` are the only operations the ingestion path calls; `Clear`
//! exists for tests only.
use async_trait::async_trait;
use pipeline_core::DEDUP_TTL_SECS;
use redis_utils::{with_timeout, SharedConnectionManager};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup backend unreachable: {0}")]
    BackendUnreachable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    New,
    Duplicate,
}

/// At most one caller observes `New` for a given `event_id` within the TTL
/// window (spec.md §4.1's single invariant). Every method fails fast on a
/// backend error rather than silently admitting the event — an ingest path
/// that can't dedupe must never assume "new".
#[async_trait]
pub trait DedupIndex: Send + Sync {
    async fn try_claim(&self, event_id: &str) -> Result<ClaimOutcome, DedupError>;

    /// Returns the ids observed as new, plus a count of duplicates, using a
    /// single pipelined round trip. Order of `new_ids` matches the order the
    /// corresponding ids appeared in `event_ids`.
    async fn batch_try_claim(&self, event_ids: &[String]) -> Result<(Vec<String>, usize), DedupError>;

    /// Test-only: removes a claim so the same event_id can be reclaimed.
    async fn clear(&self, event_id: &str) -> Result<(), DedupError>;
}

pub struct RedisDedupIndex {
    manager: SharedConnectionManager,
    key_prefix: String,
}

impl RedisDedupIndex {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self::with_prefix(manager, "dedup")
    }

    pub fn with_prefix(manager: SharedConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            manager,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}:{}", self.key_prefix, event_id)
    }
}

#[async_trait]
impl DedupIndex for RedisDedupIndex {
    async fn try_claim(&self, event_id: &str) -> Result<ClaimOutcome, DedupError> {
        let key = self.key(event_id);
        let mut conn = self.manager.lock().await;
        let claimed: Option<String> = with_timeout(
            redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(DEDUP_TTL_SECS)
                .query_async(&mut *conn),
        )
        .await
        .map_err(|e| DedupError::BackendUnreachable(e.to_string()))?;

        Ok(if claimed.is_some() {
            ClaimOutcome::New
        } else {
            ClaimOutcome::Duplicate
        })
    }

    async fn batch_try_claim(&self, event_ids: &[String]) -> Result<(Vec<String>, usize), DedupError> {
        if event_ids.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut conn = self.manager.lock().await;
        let mut new_ids = Vec::new();
        let mut duplicate_count = 0usize;

        let mut claim_pipe = redis::pipe();
        claim_pipe.atomic();
        for event_id in event_ids {
            claim_pipe
                .cmd("SET")
                .arg(self.key(event_id))
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(DEDUP_TTL_SECS);
        }

        let results: Vec<Option<String>> = with_timeout(claim_pipe.query_async(&mut *conn))
            .await
            .map_err(|e| DedupError::BackendUnreachable(e.to_string()))?;

        for (event_id, result) in event_ids.iter().zip(results.into_iter()) {
            if result.is_some() {
                new_ids.push(event_id.clone());
            } else {
                duplicate_count += 1;
            }
        }

        Ok((new_ids, duplicate_count))
    }

    async fn clear(&self, event_id: &str) -> Result<(), DedupError> {
        let mut conn = self.manager.lock().await;
        let _: i64 = with_timeout(redis::cmd("DEL").arg(self.key(event_id)).query_async(&mut *conn))
            .await
            .map_err(|e| DedupError::BackendUnreachable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_outcome_equality() {
        assert_eq!(ClaimOutcome::New, ClaimOutcome::New);
        assert_ne!(ClaimOutcome::New, ClaimOutcome::Duplicate);
    }
}
