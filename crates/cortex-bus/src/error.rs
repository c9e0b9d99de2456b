//! # Error Types
//!
//! One enum per concern. Only [`BusError`] ever reaches a publisher; the
//! others are recovered locally and surface through results and stats.

use crate::domain::event::EventId;
use thiserror::Error;

/// Errors returned synchronously by the [`EventBus`](crate::EventBus) facade.
#[derive(Debug, Error)]
pub enum BusError {
    /// `publish` was called before `start`.
    #[error("Event bus not started")]
    NotStarted,

    /// `publish` was called while `stop` is draining in-flight work.
    #[error("Event bus is shutting down")]
    ShuttingDown,

    /// The bus was stopped and cannot be restarted.
    #[error("Event bus stopped")]
    Stopped,

    /// A middleware refused the event before dispatch.
    #[error("Event {event_id} rejected by middleware '{middleware}': {reason}")]
    Rejected {
        event_id: EventId,
        middleware: String,
        reason: String,
    },

    /// The subscription pattern is not an exact type, `prefix*` or `*`.
    #[error("Invalid subscription pattern '{0}'")]
    InvalidPattern(String),

    /// The event itself is unusable (e.g. empty type).
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The detached dispatch task ended without a delivery (runtime
    /// shutdown or a panic outside handler isolation).
    #[error("Dispatch task failed: {0}")]
    Dispatch(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors from the event store and its journal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Event {0} already stored")]
    DuplicateEvent(EventId),

    #[error("Result references unknown event {0}")]
    UnknownEvent(EventId),

    #[error("Journal queue full, entry dropped")]
    JournalBackpressure,

    #[error("Journal closed")]
    JournalClosed,

    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the broker bridge and its transports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker not connected")]
    NotConnected,

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Bridge closed")]
    Closed,

    #[error("Malformed broker payload: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors a handler reports back to the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Permanent failure for this delivery.
    #[error("{0}")]
    Failed(String),

    /// Transient failure; recorded as RETRY while the event's retry budget lasts.
    #[error("retry requested: {0}")]
    Retry(String),

    /// The handler observed its cancel signal and gave up.
    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retry(message.into())
    }
}

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("Invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },
}
