//! # Cortex Bus - Process-Local Event Core
//!
//! Typed publish/subscribe with a replayable event store and an optional
//! bridge to an external message broker.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌───────────────────────────────────────┐
//!  publish() ────▶ │ EventBus                              │
//!                  │   Router: middleware ─▶ store ─▶ fan-out ──▶ handlers
//!                  │   EventStore (+ journal)              │
//!                  │   SubscriptionRegistry                │
//!                  │   BrokerBridge ◀──────────────────────┼──▶ external broker
//!                  └───────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - An event is stored before any handler sees it
//! - Handlers run in priority order (ties: registration order) and one
//!   handler's failure, panic or timeout never affects the others
//! - Only middleware rejection and lifecycle misuse surface to publishers
//! - Broker failures degrade to local-only delivery
//!
//! ## Example
//!
//! ```no_run
//! use cortex_bus::{BusConfig, EventBus, PublishOptions, SubscribeOptions};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), cortex_bus::BusError> {
//! let bus = EventBus::new(BusConfig::default())?;
//! bus.start().await?;
//!
//! bus.subscribe_fn(
//!     "case.*",
//!     |event, _ctx| async move { Ok(Some(json!({"seen": event.event_type()}))) },
//!     SubscribeOptions::new(),
//! )?;
//!
//! let delivery = bus
//!     .publish("case.created", json!({"id": "c1"}), PublishOptions::new())
//!     .await?;
//! assert!(delivery.all_succeeded());
//!
//! bus.stop().await;
//! # Ok(())
//! # }
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod bus;
pub mod domain;
pub mod error;
pub mod global;
pub mod handler;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod store;

// Re-export main types
pub use broker::{BridgeStats, BrokerMessage, BrokerTransport, InMemoryBroker};
#[cfg(feature = "redis")]
pub use broker::RedisTransport;
pub use bus::{BusState, BusStats, Delivery, EventBus, EventBusBuilder};
pub use domain::{
    BrokerConfig, BusConfig, DispatchConfig, DispatchMode, Event, EventId, EventResult,
    EventStatus, LifecycleConfig, Pattern, Payload, Priority, PublishOptions, Retention,
    StoreConfig, SubscribeOptions, SubscriptionId,
};
pub use error::{BrokerError, BusError, ConfigError, HandlerError, StoreError};
pub use handler::{handler_fn, CancelSignal, EventHandler, HandlerContext, HandlerOutcome};
pub use metrics::{BusMetrics, MetricsRecorder, MetricsSnapshot, NoOpMetrics};
pub use middleware::{FnMiddleware, MetadataStamp, Middleware, Rejection, TypeGuard};
pub use registry::{SubscriptionGuard, SubscriptionHandle};

/// Pattern matching every event type.
pub const GLOBAL_PATTERN: &str = "*";

/// Source recorded when a publisher gives none.
pub const DEFAULT_SOURCE: &str = domain::event::DEFAULT_SOURCE;
