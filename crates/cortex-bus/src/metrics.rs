//! Metrics hooks for bus operations.
//!
//! [`BusMetrics`] is always kept by the bus and backs `EventBus::stats`.
//! A user-supplied [`MetricsRecorder`] receives the same observations for
//! export to an external system.
//!
//! ## Usage
//!
//! ```ignore
//! use cortex_bus::metrics::{BusMetrics, MetricsRecorder};
//!
//! let metrics = BusMetrics::new();
//! metrics.record_published("case.created");
//! metrics.record_handler("case.created", EventStatus::Completed, elapsed);
//! let snapshot = metrics.snapshot();
//! ```

use crate::domain::result::EventStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock-free counters for dispatch activity.
#[derive(Default)]
pub struct BusMetrics {
    /// Events accepted and dispatched
    pub events_published: AtomicU64,
    /// Events refused by middleware
    pub events_rejected: AtomicU64,
    /// Stored events dispatched again via redelivery
    pub events_redelivered: AtomicU64,
    /// Handler calls, whatever their outcome
    pub handler_invocations: AtomicU64,
    pub handler_successes: AtomicU64,
    pub handler_failures: AtomicU64,
    pub handler_retries: AtomicU64,
    /// Cumulative handler time in nanoseconds
    pub handler_time_ns: AtomicU64,
    pub broker_errors: AtomicU64,
}

impl BusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self, _event_type: &str) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, _event_type: &str, _middleware: &str) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redelivered(&self, _event_type: &str) {
        self.events_redelivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one handler outcome.
    ///
    /// # Arguments
    /// * `status` - Completed, Failed or Retry
    /// * `duration` - Time until the handler finished or timed out
    pub fn record_handler(&self, _event_type: &str, status: EventStatus, duration: Duration) {
        self.handler_invocations.fetch_add(1, Ordering::Relaxed);
        self.handler_time_ns.fetch_add(
            u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        match status {
            EventStatus::Completed => self.handler_successes.fetch_add(1, Ordering::Relaxed),
            EventStatus::Retry => self.handler_retries.fetch_add(1, Ordering::Relaxed),
            _ => self.handler_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_broker_error(&self) {
        self.broker_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed handler calls over all handler calls (1.0 when idle).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.handler_invocations.load(Ordering::Relaxed);
        let successes = self.handler_successes.load(Ordering::Relaxed);
        if total > 0 {
            successes as f64 / total as f64
        } else {
            1.0
        }
    }

    #[must_use]
    pub fn avg_handler_time_ns(&self) -> u64 {
        let total = self.handler_time_ns.load(Ordering::Relaxed);
        let count = self.handler_invocations.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }

    /// Get current metrics snapshot
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_redelivered: self.events_redelivered.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_successes: self.handler_successes.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_retries: self.handler_retries.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
            avg_handler_ns: self.avg_handler_time_ns(),
            success_rate: self.success_rate(),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_rejected: u64,
    pub events_redelivered: u64,
    pub handler_invocations: u64,
    pub handler_successes: u64,
    pub handler_failures: u64,
    pub handler_retries: u64,
    pub broker_errors: u64,
    pub avg_handler_ns: u64,
    pub success_rate: f64,
}

/// Trait for custom metrics recording implementations
///
/// Implement this to export bus activity to Prometheus, StatsD, etc.
pub trait MetricsRecorder: Send + Sync {
    fn record_published(&self, event_type: &str);

    fn record_rejected(&self, event_type: &str, middleware: &str);

    fn record_handler(&self, event_type: &str, status: EventStatus, duration: Duration);

    fn record_broker_error(&self);
}

/// No-op metrics recorder for when export is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl MetricsRecorder for NoOpMetrics {
    fn record_published(&self, _event_type: &str) {}
    fn record_rejected(&self, _event_type: &str, _middleware: &str) {}
    fn record_handler(&self, _event_type: &str, _status: EventStatus, _duration: Duration) {}
    fn record_broker_error(&self) {}
}

impl MetricsRecorder for BusMetrics {
    fn record_published(&self, event_type: &str) {
        BusMetrics::record_published(self, event_type);
    }

    fn record_rejected(&self, event_type: &str, middleware: &str) {
        BusMetrics::record_rejected(self, event_type, middleware);
    }

    fn record_handler(&self, event_type: &str, status: EventStatus, duration: Duration) {
        BusMetrics::record_handler(self, event_type, status, duration);
    }

    fn record_broker_error(&self) {
        BusMetrics::record_broker_error(self);
    }
}

/// Internal counters plus the optional external recorder, observed together.
#[derive(Clone)]
pub(crate) struct Instruments {
    pub(crate) metrics: Arc<BusMetrics>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl Instruments {
    pub(crate) fn new(recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            metrics: Arc::new(BusMetrics::new()),
            recorder,
        }
    }

    pub(crate) fn published(&self, event_type: &str) {
        self.metrics.record_published(event_type);
        self.recorder.record_published(event_type);
    }

    pub(crate) fn rejected(&self, event_type: &str, middleware: &str) {
        self.metrics.record_rejected(event_type, middleware);
        self.recorder.record_rejected(event_type, middleware);
    }

    pub(crate) fn redelivered(&self, event_type: &str) {
        self.metrics.record_redelivered(event_type);
    }

    pub(crate) fn handler(&self, event_type: &str, status: EventStatus, duration: Duration) {
        self.metrics.record_handler(event_type, status, duration);
        self.recorder.record_handler(event_type, status, duration);
    }

    pub(crate) fn broker_error(&self) {
        self.metrics.record_broker_error();
        self.recorder.record_broker_error();
    }
}

impl Default for Instruments {
    fn default() -> Self {
        Self::new(Arc::new(NoOpMetrics))
    }
}
