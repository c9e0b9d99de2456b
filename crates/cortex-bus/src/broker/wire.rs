//! # Broker Wire Format
//!
//! JSON object:
//!
//! ```json
//! {"id": "...", "type": "case.created", "source": "intake",
//!  "timestamp": "2024-05-01T12:00:00Z", "data": {}, "metadata": {},
//!  "priority": "normal", "correlation_id": null, "causation_id": null}
//! ```
//!
//! `correlation_id` and `causation_id` are always present, `null` when unset.
//!
//! Decoding is best-effort: only `type` is required. A missing or non-UUID
//! id gets a fresh one (the original is kept in metadata `external_id`), a
//! missing timestamp becomes "now", priority accepts names or levels 1-4,
//! and non-object `data` is wrapped under `"value"`.

use crate::domain::event::{into_payload, Event, Payload, Priority, DEFAULT_SOURCE};
use crate::error::BrokerError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Metadata key holding a foreign id that was not a UUID.
pub const EXTERNAL_ID_KEY: &str = "external_id";

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    causation_id: Option<String>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Serialize an event for the broker.
pub fn encode(event: &Event) -> Result<Vec<u8>, BrokerError> {
    serde_json::to_vec(event).map_err(|e| BrokerError::Serialization(e.to_string()))
}

/// Parse a broker payload into an event.
///
/// # Errors
///
/// `BrokerError::Malformed` when the payload is not a JSON object or has no
/// usable `type`.
pub fn decode(payload: &[u8]) -> Result<Event, BrokerError> {
    let wire: WireEvent =
        serde_json::from_slice(payload).map_err(|e| BrokerError::Malformed(e.to_string()))?;

    let event_type = wire
        .event_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| BrokerError::Malformed("missing event type".to_string()))?;

    let mut metadata = match wire.metadata {
        Value::Object(map) => map,
        _ => Payload::new(),
    };

    let id = match wire.id {
        Some(Value::String(raw)) => match Uuid::parse_str(&raw) {
            Ok(id) => id,
            Err(_) => {
                metadata.insert(EXTERNAL_ID_KEY.to_string(), Value::String(raw));
                Uuid::new_v4()
            }
        },
        Some(Value::Null) | None => Uuid::new_v4(),
        Some(other) => {
            metadata.insert(EXTERNAL_ID_KEY.to_string(), other);
            Uuid::new_v4()
        }
    };

    let timestamp = wire
        .timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    let mut event = Event::with_identity(id, event_type, timestamp, into_payload(wire.data))
        .with_source(
            wire.source
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        )
        .with_priority(wire.priority)
        .with_metadata(metadata);

    if let Some(correlation_id) = wire.correlation_id {
        event = event.with_correlation_id(correlation_id);
    }
    if let Some(causation_id) = wire.causation_id {
        event = event.with_causation_id(causation_id);
    }
    if let Some(retry_count) = wire.retry_count {
        event = event.with_retry_count(retry_count);
    }
    if let Some(max_retries) = wire.max_retries {
        event = event.with_max_retries(max_retries);
    }
    if let Some(timeout_ms) = wire.timeout_ms {
        event = event.with_timeout(Duration::from_millis(timeout_ms));
    }
    Ok(event)
}

/// RFC 3339, naive ISO-8601 (assumed UTC) or epoch seconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
        Value::Number(number) => {
            let seconds = number.as_f64()?;
            let whole = seconds.floor();
            let nanos = ((seconds - whole) * 1e9) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }
        _ => None,
    }
}
