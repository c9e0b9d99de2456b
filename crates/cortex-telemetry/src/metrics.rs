//! Prometheus export of event bus activity.
//!
//! All metrics follow the naming convention: `cortex_bus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: events published/rejected, handler calls by status,
//!   broker errors
//! - **Histogram**: handler duration by event type

use cortex_bus::{EventStatus, MetricsRecorder};
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

use crate::TelemetryError;

/// [`MetricsRecorder`] backed by a dedicated Prometheus registry.
///
/// ```rust,ignore
/// let recorder = Arc::new(PrometheusRecorder::new()?);
/// let bus = EventBus::builder()
///     .with_metrics_recorder(recorder.clone())
///     .build()?;
/// // later, from a /metrics handler:
/// let body = recorder.encode()?;
/// ```
#[derive(Clone)]
pub struct PrometheusRecorder {
    registry: Registry,
    events_published: CounterVec,
    events_rejected: CounterVec,
    handler_calls: CounterVec,
    handler_duration: HistogramVec,
    broker_errors: Counter,
}

impl PrometheusRecorder {
    /// Create the recorder and register its collectors.
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let metric_err = |e: prometheus::Error| TelemetryError::MetricsInit(e.to_string());

        let events_published = CounterVec::new(
            Opts::new("cortex_bus_events_published_total", "Events accepted and dispatched"),
            &["event_type"],
        )
        .map_err(metric_err)?;

        let events_rejected = CounterVec::new(
            Opts::new("cortex_bus_events_rejected_total", "Events refused by middleware"),
            &["event_type", "middleware"],
        )
        .map_err(metric_err)?;

        let handler_calls = CounterVec::new(
            Opts::new("cortex_bus_handler_calls_total", "Handler invocations by outcome"),
            &["event_type", "status"], // status: completed/failed/retry
        )
        .map_err(metric_err)?;

        let handler_duration = HistogramVec::new(
            HistogramOpts::new(
                "cortex_bus_handler_duration_seconds",
                "Time spent in event handlers",
            )
            .buckets(exponential_buckets(0.0001, 2.0, 15).map_err(metric_err)?),
            &["event_type"],
        )
        .map_err(metric_err)?;

        let broker_errors = Counter::new(
            "cortex_bus_broker_errors_total",
            "Broker publish, connect and decode failures",
        )
        .map_err(metric_err)?;

        registry
            .register(Box::new(events_published.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(events_rejected.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(handler_calls.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(handler_duration.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(broker_errors.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            events_published,
            events_rejected,
            handler_calls,
            handler_duration,
            broker_errors,
        })
    }

    /// The underlying registry, for merging into an existing exporter.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
    }
}

impl MetricsRecorder for PrometheusRecorder {
    fn record_published(&self, event_type: &str) {
        self.events_published.with_label_values(&[event_type]).inc();
    }

    fn record_rejected(&self, event_type: &str, middleware: &str) {
        self.events_rejected
            .with_label_values(&[event_type, middleware])
            .inc();
    }

    fn record_handler(&self, event_type: &str, status: EventStatus, duration: Duration) {
        let status = status.to_string();
        self.handler_calls
            .with_label_values(&[event_type, status.as_str()])
            .inc();
        self.handler_duration
            .with_label_values(&[event_type])
            .observe(duration.as_secs_f64());
    }

    fn record_broker_error(&self) {
        self.broker_errors.inc();
    }
}
