use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// `event_type` must start with a letter and contain only letters, digits,
/// `_`, `.` and `-`; 1-100 chars total.
pub static EVENT_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*$").expect("event_type regex is valid"));

/// The envelope producers submit. `metadata`/`payload` are opaque JSON blobs
/// — nothing downstream of validation parses them; the document store keeps
/// them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EventInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,

    #[validate(length(min = 1, message = "session_id is required"))]
    pub session_id: String,

    #[validate(custom(function = "validate_event_type"))]
    pub event_type: String,

    #[validate(custom(function = "validate_timestamp"))]
    pub timestamp: String,

    #[serde(default = "default_priority")]
    #[validate(range(min = 0, max = 3, message = "priority must be between 0 and 3"))]
    pub priority: i32,

    #[serde(default)]
    pub metadata: Option<Value>,

    #[serde(default)]
    pub payload: Option<Value>,
}

fn default_priority() -> i32 {
    1
}

fn validate_event_type(value: &str) -> Result<(), validator::ValidationError> {
    if value.is_empty() || value.len() > 100 || !EVENT_TYPE_RE.is_match(value) {
        let mut err = validator::ValidationError::new("event_type_format");
        err.message = Some("event_type must match ^[A-Za-z][A-Za-z0-9_.-]*$ and be 1-100 chars".into());
        return Err(err);
    }
    Ok(())
}

fn validate_timestamp(value: &str) -> Result<(), validator::ValidationError> {
    if DateTime::parse_from_rfc3339(value).is_err() {
        let mut err = validator::ValidationError::new("timestamp_format");
        err.message = Some("timestamp must be a valid ISO-8601 instant".into());
        return Err(err);
    }
    Ok(())
}

/// The fully-formed event after ingestion assigns `event_id` (if the
/// producer didn't supply one) and stamps server-side audit fields. This is
/// what gets serialized into the stream entry and, eventually, the document
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub user_id: String,
    pub session_id: String,
    pub event_type: String,
    pub timestamp: String,
    pub priority: i32,
    pub metadata: Option<Value>,
    pub payload: Option<Value>,
    pub ingested_at: DateTime<Utc>,
    pub source_user_id: String,
}

impl Event {
    pub fn from_input(input: EventInput, source_user_id: String, ingested_at: DateTime<Utc>) -> Self {
        let event_id = input.event_id.unwrap_or_else(generate_event_id);
        Self {
            event_id,
            user_id: input.user_id,
            session_id: input.session_id,
            event_type: input.event_type,
            timestamp: input.timestamp,
            priority: input.priority,
            metadata: input.metadata,
            payload: input.payload,
            ingested_at,
            source_user_id,
        }
    }

    /// Flattens the event into the `field -> value` map the stream's
    /// `Append` operation takes, with nested metadata/payload re-encoded as
    /// JSON strings (Redis Streams fields are flat strings).
    pub fn to_stream_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("event_id".to_string(), self.event_id.clone()),
            ("user_id".to_string(), self.user_id.clone()),
            ("session_id".to_string(), self.session_id.clone()),
            ("event_type".to_string(), self.event_type.clone()),
            ("timestamp".to_string(), self.timestamp.clone()),
            ("priority".to_string(), self.priority.to_string()),
            ("ingested_at".to_string(), self.ingested_at.to_rfc3339()),
            ("source_user_id".to_string(), self.source_user_id.clone()),
        ];
        if let Some(metadata) = &self.metadata {
            fields.push(("metadata".to_string(), metadata.to_string()));
        }
        if let Some(payload) = &self.payload {
            fields.push(("payload".to_string(), payload.to_string()));
        }
        fields
    }

    /// Inverse of `to_stream_fields`. Returns `None` if a required field is
    /// missing — callers treat that as an invalid stream entry: ack it and
    /// drop it rather than blocking the buffer on it forever.
    pub fn from_stream_fields(fields: &[(String, String)]) -> Option<Self> {
        let get = |key: &str| fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        let event_id = get("event_id")?;
        let user_id = get("user_id")?;
        let session_id = get("session_id")?;
        let event_type = get("event_type")?;
        let timestamp = get("timestamp")?;
        let priority = get("priority").and_then(|p| p.parse().ok()).unwrap_or(1);
        let ingested_at = get("ingested_at")
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|v| v.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let source_user_id = get("source_user_id").unwrap_or_default();
        let metadata = get("metadata").and_then(|v| serde_json::from_str(&v).ok());
        let payload = get("payload").and_then(|v| serde_json::from_str(&v).ok());

        Some(Self {
            event_id,
            user_id,
            session_id,
            event_type,
            timestamp,
            priority,
            metadata,
            payload,
            ingested_at,
            source_user_id,
        })
    }
}

/// `evt_<base36 millis since epoch>_<16 hex chars>`.
pub fn generate_event_id() -> String {
    use rand::RngCore;
    let millis = Utc::now().timestamp_millis().max(0) as u128;
    let mut rng = rand::rng();
    let mut bytes = [0u8; 8];
    rng.fill_bytes(&mut bytes);
    format!("evt_{}_{}", to_base36(millis), hex::encode(bytes))
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 alphabet is ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> EventInput {
        EventInput {
            event_id: None,
            user_id: "user-1".to_string(),
            session_id: "session-1".to_string(),
            event_type: "page.view".to_string(),
            timestamp: "2026-07-30T12:00:00Z".to_string(),
            priority: 1,
            metadata: None,
            payload: Some(serde_json::json!({"a": 1})),
        }
    }

    #[test]
    fn accepts_well_formed_input() {
        assert!(valid_input().validate().is_ok());
    }

    #[test]
    fn rejects_bad_event_type() {
        let mut input = valid_input();
        input.event_type = "1-bad-start".to_string();
        assert!(input.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let mut input = valid_input();
        input.priority = 4;
        assert!(input.validate().is_err());
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let mut input = valid_input();
        input.timestamp = "not-a-timestamp".to_string();
        assert!(input.validate().is_err());
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let raw = serde_json::json!({
            "user_id": "u1",
            "session_id": "s1",
            "event_type": "page.view",
            "timestamp": "2026-07-30T12:00:00Z",
            "priority": 1,
            "unexpected_field": "nope"
        });
        let parsed: Result<EventInput, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn event_id_defaults_and_is_idempotent_key() {
        let event = Event::from_input(valid_input(), "owner-1".to_string(), Utc::now());
        assert!(event.event_id.starts_with("evt_"));
    }

    #[test]
    fn stream_fields_round_trip() {
        let event = Event::from_input(valid_input(), "owner-1".to_string(), Utc::now());
        let fields = event.to_stream_fields();
        let restored = Event::from_stream_fields(&fields).expect("round trip");
        assert_eq!(restored.event_id, event.event_id);
        assert_eq!(restored.user_id, event.user_id);
        assert_eq!(restored.payload, event.payload);
    }

    #[test]
    fn from_stream_fields_rejects_missing_required_field() {
        let fields = vec![("user_id".to_string(), "u1".to_string())];
        assert!(Event::from_stream_fields(&fields).is_none());
    }
}
