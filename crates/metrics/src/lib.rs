//! C3 Metrics Counters. Every operation here is non-fatal by contract: a
//! counters-backend outage must never fail an ingest request or a processed
//! batch, so failures are logged and swallowed rather than propagated.
use async_trait::async_trait;
use chrono::Utc;
use redis_utils::{with_timeout, SharedConnectionManager};
use tracing::warn;

const INGESTED_TOTAL_KEY: &str = "ingested:total";
const DUPLICATES_TOTAL_KEY: &str = "duplicates:total";
const PROCESSED_TOTAL_KEY: &str = "processed:total";
const FAILED_TOTAL_KEY: &str = "failed:total";
const DLQ_TOTAL_KEY: &str = "dlq:total";
const LAST_PROCESSED_AT_KEY: &str = "processed:last_at";
const LAST_BATCH_SIZE_KEY: &str = "processed:last_batch_size";

const PER_SECOND_TTL_SECS: i64 = 120;
const RATE_WINDOW_SECS: i64 = 60;

#[async_trait]
pub trait MetricsCounters: Send + Sync {
    async fn inc_ingested(&self, accepted: u64, duplicates: u64);
    async fn inc_processed(&self, batch_size: u64, event_types: &[String], processing_ms: u64);
    async fn inc_failed(&self, count: u64);
    async fn inc_dlq(&self, count: u64);

    /// Average accepted-events-per-second over the last 60 seconds.
    async fn rate_ingest(&self) -> f64;

    /// Cumulative `ingested:total` counter, for the `/v1/events/stats` surface.
    async fn total_ingested(&self) -> u64;
}

pub struct RedisMetricsCounters {
    manager: SharedConnectionManager,
}

impl RedisMetricsCounters {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }

    fn second_key(second: i64) -> String {
        format!("ingested:{}", second)
    }
}

#[async_trait]
impl MetricsCounters for RedisMetricsCounters {
    async fn inc_ingested(&self, accepted: u64, duplicates: u64) {
        let second = Utc::now().timestamp();
        let mut conn = self.manager.lock().await;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if accepted > 0 {
            pipe.cmd("INCRBY").arg(INGESTED_TOTAL_KEY).arg(accepted).ignore();
            pipe.cmd("INCRBY")
                .arg(Self::second_key(second))
                .arg(accepted)
                .ignore();
            pipe.cmd("EXPIRE")
                .arg(Self::second_key(second))
                .arg(PER_SECOND_TTL_SECS)
                .ignore();
        }
        if duplicates > 0 {
            pipe.cmd("INCRBY").arg(DUPLICATES_TOTAL_KEY).arg(duplicates).ignore();
        }

        if let Err(err) = with_timeout(pipe.query_async::<_, ()>(&mut *conn)).await {
            warn!(%err, "metrics: inc_ingested failed, continuing without it");
        }
    }

    async fn inc_processed(&self, batch_size: u64, event_types: &[String], processing_ms: u64) {
        let mut conn = self.manager.lock().await;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("INCRBY").arg(PROCESSED_TOTAL_KEY).arg(batch_size).ignore();
        pipe.cmd("SET").arg(LAST_BATCH_SIZE_KEY).arg(batch_size).ignore();
        pipe.cmd("SET")
            .arg(LAST_PROCESSED_AT_KEY)
            .arg(Utc::now().to_rfc3339())
            .ignore();
        for event_type in event_types {
            pipe.cmd("INCR").arg(format!("processed:type:{}", event_type)).ignore();
        }
        let _ = processing_ms; // recorded by the ambient prometheus histogram, not here

        if let Err(err) = with_timeout(pipe.query_async::<_, ()>(&mut *conn)).await {
            warn!(%err, "metrics: inc_processed failed, continuing without it");
        }
    }

    async fn inc_failed(&self, count: u64) {
        if count == 0 {
            return;
        }
        let mut conn = self.manager.lock().await;
        if let Err(err) = with_timeout(
            redis::cmd("INCRBY")
                .arg(FAILED_TOTAL_KEY)
                .arg(count)
                .query_async::<_, ()>(&mut *conn),
        )
        .await
        {
            warn!(%err, "metrics: inc_failed failed, continuing without it");
        }
    }

    async fn inc_dlq(&self, count: u64) {
        if count == 0 {
            return;
        }
        let mut conn = self.manager.lock().await;
        if let Err(err) = with_timeout(
            redis::cmd("INCRBY")
                .arg(DLQ_TOTAL_KEY)
                .arg(count)
                .query_async::<_, ()>(&mut *conn),
        )
        .await
        {
            warn!(%err, "metrics: inc_dlq failed, continuing without it");
        }
    }

    async fn rate_ingest(&self) -> f64 {
        let now = Utc::now().timestamp();
        let keys: Vec<String> = (0..RATE_WINDOW_SECS).map(|i| Self::second_key(now - i)).collect();

        let mut conn = self.manager.lock().await;
        let mut cmd = redis::cmd("MGET");
        for key in &keys {
            cmd.arg(key);
        }

        let values: Vec<Option<i64>> = match with_timeout(cmd.query_async(&mut *conn)).await {
            Ok(values) => values,
            Err(err) => {
                warn!(%err, "metrics: rate_ingest failed, returning 0.0");
                return 0.0;
            }
        };

        let sum: i64 = values.into_iter().flatten().sum();
        sum as f64 / RATE_WINDOW_SECS as f64
    }

    async fn total_ingested(&self) -> u64 {
        let mut conn = self.manager.lock().await;
        match with_timeout(
            redis::cmd("GET")
                .arg(INGESTED_TOTAL_KEY)
                .query_async::<_, Option<i64>>(&mut *conn),
        )
        .await
        {
            Ok(value) => value.unwrap_or(0).max(0) as u64,
            Err(err) => {
                warn!(%err, "metrics: total_ingested failed, returning 0");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_key_format() {
        assert_eq!(RedisMetricsCounters::second_key(1_700_000_000), "ingested:1700000000");
    }
}
