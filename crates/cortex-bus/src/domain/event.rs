//! # Events
//!
//! The value object that flows through the bus. Identity (`id`, `type`,
//! `timestamp`) is fixed at construction; everything else is set through
//! consuming `with_*` builders before the event is published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique event identifier.
pub type EventId = Uuid;

/// Opaque key-value payload used for both `data` and `metadata`.
pub type Payload = Map<String, Value>;

/// Default retry budget carried by new events.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Source label used when the publisher does not name one.
pub const DEFAULT_SOURCE: &str = "unknown";

/// Dispatch priority among handlers of a single event.
///
/// Ordering is `Low < Normal < High < Critical`. Priority never orders
/// events relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    /// Parse a priority name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Map a numeric level (1..=4) to a priority.
    #[must_use]
    pub fn from_level(level: u64) -> Option<Self> {
        match level {
            1 => Some(Self::Low),
            2 => Some(Self::Normal),
            3 => Some(Self::High),
            4 => Some(Self::Critical),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Lenient on input: names in any case or numeric levels; anything else is Normal.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Level(u64),
            Name(String),
            Other(serde::de::IgnoredAny),
        }

        let priority = match Repr::deserialize(deserializer)? {
            Repr::Level(level) => Self::from_level(level),
            Repr::Name(name) => Self::parse(&name),
            Repr::Other(_) => None,
        };
        Ok(priority.unwrap_or_default())
    }
}

/// An immutable record of something that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    source: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: Payload,
    #[serde(default)]
    metadata: Payload,
    #[serde(default)]
    priority: Priority,
    // Always present on the wire, `null` when unset.
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    causation_id: Option<String>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Event {
    /// Create an event with a fresh id and the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Payload) -> Self {
        Self::with_identity(Uuid::new_v4(), event_type, Utc::now(), data)
    }

    /// Create an event with an explicit identity (used when decoding events
    /// that originated elsewhere).
    #[must_use]
    pub fn with_identity(
        id: EventId,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Payload,
    ) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            source: DEFAULT_SOURCE.to_string(),
            timestamp,
            data,
            metadata: Payload::new(),
            priority: Priority::Normal,
            correlation_id: None,
            causation_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Link this event to the one that triggered it, inheriting its
    /// correlation id when this event has none.
    #[must_use]
    pub fn caused_by(mut self, cause: &Event) -> Self {
        self.causation_id = Some(cause.id.to_string());
        if self.correlation_id.is_none() {
            self.correlation_id = Some(
                cause
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| cause.id.to_string()),
            );
        }
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Copy of this event for another delivery attempt. Identity is kept.
    #[must_use]
    pub fn retried(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = next.retry_count.saturating_add(1);
        next
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn data(&self) -> &Payload {
        &self.data
    }

    #[must_use]
    pub fn metadata(&self) -> &Payload {
        &self.metadata
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    #[must_use]
    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt fits in the retry budget.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// True when `other` has the same id, type and timestamp.
    #[must_use]
    pub fn same_identity(&self, other: &Event) -> bool {
        self.id == other.id
            && self.event_type == other.event_type
            && self.timestamp == other.timestamp
    }

    /// Reject events that cannot be routed.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_type.trim().is_empty() {
            return Err("event type is empty".to_string());
        }
        if self.event_type.contains('*') {
            return Err(format!(
                "event type '{}' contains a wildcard",
                self.event_type
            ));
        }
        Ok(())
    }
}

/// Turn an arbitrary JSON value into a payload map.
///
/// Objects are used as-is, `null` becomes an empty map, and any other value
/// is stored under the `"value"` key.
#[must_use]
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Options recognised by `EventBus::publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    source: Option<String>,
    priority: Priority,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    metadata: Payload,
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// Deadline for each handler of this event.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build the event these options describe.
    #[must_use]
    pub fn into_event(self, event_type: impl Into<String>, data: Payload) -> Event {
        let mut event = Event::new(event_type, data)
            .with_priority(self.priority)
            .with_metadata(self.metadata);
        if let Some(source) = self.source {
            event = event.with_source(source);
        }
        if let Some(correlation_id) = self.correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(causation_id) = self.causation_id {
            event = event.with_causation_id(causation_id);
        }
        if let Some(timeout) = self.timeout {
            event = event.with_timeout(timeout);
        }
        if let Some(max_retries) = self.max_retries {
            event = event.with_max_retries(max_retries);
        }
        event
    }
}
