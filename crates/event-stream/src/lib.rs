//! C2 Event Stream: a durable, append-only log with consumer-group
//! semantics (at-least-once delivery, pending-entry-list tracking, stale
//! message reclaim). Built on Redis Streams; any backend offering the same
//! wire-level contract (append, consumer groups, PEL, claim-idle,
//! block-on-empty read, monotonic entry ids) is an acceptable substitute.
use async_trait::async_trait;
use pipeline_core::{GroupInfo, PendingEntry, StreamEntry};
use redis::Value;
use redis_utils::{with_timeout, SharedConnectionManager};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventStreamError {
    #[error("stream backend unreachable: {0}")]
    BackendUnreachable(String),
    #[error("malformed response from stream backend: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait EventStream: Send + Sync {
    /// Appends `fields` to `stream`, returning the assigned, monotonic
    /// `entry_id`.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, EventStreamError>;

    /// Appends every item in `batch` in a single pipelined round trip,
    /// returning assigned entry ids in the same order as `batch`. Mirrors
    /// `DedupIndex::batch_try_claim`'s pipelining so the batch ingest path
    /// never pays one round trip per event.
    async fn append_batch(&self, stream: &str, batch: &[Vec<(String, String)>]) -> Result<Vec<String>, EventStreamError>;

    /// Idempotent: creating a group that already exists is success, not an
    /// error.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), EventStreamError>;

    /// Blocks up to `block_ms` for new entries, returning `[]` on timeout.
    /// Entries returned join the group's pending entry list under
    /// `consumer_id`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer_id: &str,
        max_count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, EventStreamError>;

    /// Acknowledges `entry_ids`, returning how many were actually in the
    /// PEL (entries not found there are silently ignored, matching
    /// at-least-once semantics after a redelivery already happened).
    async fn acknowledge(&self, stream: &str, group: &str, entry_ids: &[String]) -> Result<usize, EventStreamError>;

    /// Atomically reassigns PEL entries idle at least `min_idle_ms` to
    /// `consumer_id`, incrementing their delivery count.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer_id: &str,
        min_idle_ms: u64,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>, EventStreamError>;

    async fn info(&self, stream: &str, group: &str) -> Result<GroupInfo, EventStreamError>;
}

pub struct RedisEventStream {
    manager: SharedConnectionManager,
}

impl RedisEventStream {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, EventStreamError> {
        let mut conn = self.manager.lock().await;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let entry_id: String = with_timeout(cmd.query_async(&mut *conn))
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;
        Ok(entry_id)
    }

    async fn append_batch(&self, stream: &str, batch: &[Vec<(String, String)>]) -> Result<Vec<String>, EventStreamError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.manager.lock().await;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for fields in batch {
            let mut cmd = redis::cmd("XADD");
            cmd.arg(stream).arg("*");
            for (key, value) in fields {
                cmd.arg(key).arg(value);
            }
            pipe.add_command(cmd);
        }

        let entry_ids: Vec<String> = with_timeout(pipe.query_async(&mut *conn))
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;
        Ok(entry_ids)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), EventStreamError> {
        let mut conn = self.manager.lock().await;
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(EventStreamError::BackendUnreachable(e.to_string())),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer_id: &str,
        max_count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, EventStreamError> {
        let mut conn = self.manager.lock().await;
        let raw: Value = with_timeout(
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group)
                .arg(consumer_id)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("COUNT")
                .arg(max_count)
                .arg("STREAMS")
                .arg(stream)
                .arg(">")
                .query_async(&mut *conn),
        )
        .await
        .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;

        parse_xreadgroup_response(raw)
    }

    async fn acknowledge(&self, stream: &str, group: &str, entry_ids: &[String]) -> Result<usize, EventStreamError> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.lock().await;
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in entry_ids {
            cmd.arg(id);
        }
        let acked: usize = with_timeout(cmd.query_async(&mut *conn))
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;
        Ok(acked)
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer_id: &str,
        min_idle_ms: u64,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>, EventStreamError> {
        let mut conn = self.manager.lock().await;
        let pending_ids = pending_entry_ids(&mut conn, stream, group, max_count)
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;
        if pending_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer_id).arg(min_idle_ms);
        for id in &pending_ids {
            cmd.arg(id);
        }
        let raw: Value = with_timeout(cmd.query_async(&mut *conn))
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;

        parse_entry_list(&raw)
    }

    async fn info(&self, stream: &str, group: &str) -> Result<GroupInfo, EventStreamError> {
        let mut conn = self.manager.lock().await;

        let length: u64 = with_timeout(redis::cmd("XLEN").arg(stream).query_async(&mut *conn))
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;

        let pending_summary: (u64, Option<String>, Option<String>, Option<Vec<(String, String)>>) =
            with_timeout(
                redis::cmd("XPENDING")
                    .arg(stream)
                    .arg(group)
                    .query_async(&mut *conn),
            )
            .await
            .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;

        let consumers_raw: Vec<Vec<(String, Value)>> = with_timeout(
            redis::cmd("XINFO")
                .arg("CONSUMERS")
                .arg(stream)
                .arg(group)
                .query_async(&mut *conn),
        )
        .await
        .unwrap_or_default();

        let consumers = consumers_raw
            .into_iter()
            .filter_map(|fields| {
                fields.into_iter().find_map(|(key, value)| {
                    if key == "name" {
                        match value {
                            Value::Data(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
                            Value::Status(s) => Some(s),
                            _ => None,
                        }
                    } else {
                        None
                    }
                })
            })
            .collect();

        Ok(GroupInfo {
            length,
            pending_count: pending_summary.0,
            consumers,
        })
    }
}

async fn pending_entry_ids(
    conn: &mut redis::aio::ConnectionManager,
    stream: &str,
    group: &str,
    max_count: usize,
) -> Result<Vec<String>, redis::RedisError> {
    let rows: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
        .arg(stream)
        .arg(group)
        .arg("-")
        .arg("+")
        .arg(max_count)
        .query_async(conn)
        .await?;
    Ok(rows.into_iter().map(|(id, ..)| id).collect())
}

fn parse_xreadgroup_response(raw: Value) -> Result<Vec<StreamEntry>, EventStreamError> {
    let streams = match raw {
        Value::Bulk(streams) => streams,
        Value::Nil => return Ok(Vec::new()),
        other => return Err(EventStreamError::MalformedResponse(format!("{:?}", other))),
    };

    let mut entries = Vec::new();
    for stream_pair in streams {
        if let Value::Bulk(pair) = stream_pair {
            if pair.len() == 2 {
                entries.extend(parse_entry_list(&pair[1])?);
            }
        }
    }
    Ok(entries)
}

fn parse_entry_list(raw: &Value) -> Result<Vec<StreamEntry>, EventStreamError> {
    let raw_entries = match raw {
        Value::Bulk(entries) => entries,
        Value::Nil => return Ok(Vec::new()),
        other => return Err(EventStreamError::MalformedResponse(format!("{:?}", other))),
    };

    let mut entries = Vec::new();
    for raw_entry in raw_entries {
        if let Value::Bulk(parts) = raw_entry {
            if parts.len() != 2 {
                continue;
            }
            let entry_id = match &parts[0] {
                Value::Data(bytes) => String::from_utf8_lossy(bytes).to_string(),
                Value::Status(s) => s.clone(),
                other => {
                    return Err(EventStreamError::MalformedResponse(format!("{:?}", other)));
                }
            };
            let field_values = match &parts[1] {
                Value::Bulk(values) => values,
                _ => continue,
            };
            let mut fields = Vec::new();
            for pair in field_values.chunks(2) {
                if let [key, value] = pair {
                    let key = value_to_string(key);
                    let value = value_to_string(value);
                    if let (Some(key), Some(value)) = (key, value) {
                        fields.push((key, value));
                    }
                }
            }
            entries.push(StreamEntry {
                entry_id,
                fields,
                delivery_count: 0,
                first_delivered_at: None,
                last_delivered_at: None,
                owner_consumer: None,
            });
        }
    }
    Ok(entries)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Status(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Not part of the trait's hot path, but exposed for worker-side diagnostics
/// — the PEL row shape itself (`entry_id`/`consumer`/`idle_ms`/
/// `delivery_count`), parsed from `XPENDING stream group - + count`.
pub async fn pending_entries(
    manager: &SharedConnectionManager,
    stream: &str,
    group: &str,
    max_count: usize,
) -> Result<Vec<PendingEntry>, EventStreamError> {
    let mut conn = manager.lock().await;
    let rows: Vec<(String, String, i64, i64)> = with_timeout(
        redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(max_count)
            .query_async(&mut *conn),
    )
    .await
    .map_err(|e| EventStreamError::BackendUnreachable(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|(entry_id, consumer, idle_ms, delivery_count)| PendingEntry {
            entry_id,
            consumer,
            idle_ms: idle_ms.max(0) as u64,
            delivery_count: delivery_count.max(0) as u32,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_stream_response_as_no_entries() {
        let entries = parse_xreadgroup_response(Value::Nil).expect("parses");
        assert!(entries.is_empty());
    }

    #[test]
    fn parses_xreadgroup_shape_into_entries() {
        let raw = Value::Bulk(vec![Value::Bulk(vec![
            Value::Data(b"events_stream".to_vec()),
            Value::Bulk(vec![Value::Bulk(vec![
                Value::Data(b"1-0".to_vec()),
                Value::Bulk(vec![
                    Value::Data(b"event_id".to_vec()),
                    Value::Data(b"evt_1".to_vec()),
                ]),
            ])]),
        ])]);

        let entries = parse_xreadgroup_response(raw).expect("parses");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_id, "1-0");
        assert_eq!(entries[0].fields, vec![("event_id".to_string(), "evt_1".to_string())]);
    }
}
