//! Per-handler delivery results.

use crate::domain::event::EventId;
use crate::domain::subscription::SubscriptionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one (event, handler) delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
}

impl EventStatus {
    /// Completed and Failed are final; Retry invites another attempt.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// Outcome of delivering one event to one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub event_id: EventId,
    /// `None` for results produced before any handler ran (middleware rejection).
    pub subscription_id: Option<SubscriptionId>,
    /// Handler name, or `middleware:<name>` for rejections.
    pub handler: String,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_micros")]
    pub processing_time: Duration,
    pub timestamp: DateTime<Utc>,
}

impl EventResult {
    fn new(
        event_id: EventId,
        subscription_id: Option<SubscriptionId>,
        handler: impl Into<String>,
        status: EventStatus,
        processing_time: Duration,
    ) -> Self {
        Self {
            event_id,
            subscription_id,
            handler: handler.into(),
            status,
            result: None,
            error: None,
            processing_time,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn completed(
        event_id: EventId,
        subscription_id: SubscriptionId,
        handler: impl Into<String>,
        result: Option<Value>,
        processing_time: Duration,
    ) -> Self {
        let mut outcome = Self::new(
            event_id,
            Some(subscription_id),
            handler,
            EventStatus::Completed,
            processing_time,
        );
        outcome.result = result;
        outcome
    }

    #[must_use]
    pub fn failed(
        event_id: EventId,
        subscription_id: Option<SubscriptionId>,
        handler: impl Into<String>,
        error: impl Into<String>,
        processing_time: Duration,
    ) -> Self {
        let mut outcome = Self::new(
            event_id,
            subscription_id,
            handler,
            EventStatus::Failed,
            processing_time,
        );
        outcome.error = Some(error.into());
        outcome
    }

    #[must_use]
    pub fn retry(
        event_id: EventId,
        subscription_id: SubscriptionId,
        handler: impl Into<String>,
        error: impl Into<String>,
        processing_time: Duration,
    ) -> Self {
        let mut outcome = Self::new(
            event_id,
            Some(subscription_id),
            handler,
            EventStatus::Retry,
            processing_time,
        );
        outcome.error = Some(error.into());
        outcome
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == EventStatus::Completed
    }
}

mod duration_micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}
