//! # Cortex Telemetry
//!
//! Observability wiring for services embedding the Cortex event bus.
//!
//! ## Components
//!
//! - **Logging**: global `tracing` subscriber, pretty or JSON, env-filtered
//! - **Metrics**: [`PrometheusRecorder`], a `MetricsRecorder` for the bus
//!   exported in the Prometheus text format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cortex_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let telemetry = init_telemetry(&TelemetryConfig::from_env())?;
//! let bus = EventBus::builder()
//!     .with_metrics_recorder(telemetry.recorder())
//!     .build()?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CORTEX_SERVICE_NAME` | `cortex` | Service name in logs |
//! | `CORTEX_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` wins) |
//! | `CORTEX_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `CORTEX_JSON_LOGS` | `false` | JSON lines (default on in containers) |

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging, LoggingGuard};
pub use metrics::PrometheusRecorder;

use std::sync::Arc;
use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Install logging and create the Prometheus recorder.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first: failure here leaves no global state behind
    let recorder = Arc::new(PrometheusRecorder::new()?);
    let logging = init_logging(config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        recorder,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
    recorder: Arc<PrometheusRecorder>,
}

impl TelemetryGuard {
    /// Recorder to hand to `EventBusBuilder::with_metrics_recorder`.
    pub fn recorder(&self) -> Arc<PrometheusRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Current metrics in Prometheus text format.
    pub fn encode_metrics(&self) -> Result<String, TelemetryError> {
        self.recorder.encode()
    }
}
