//! Domain layer: plain values, no I/O.

pub mod config;
pub mod event;
pub mod pattern;
pub mod result;
pub mod subscription;

pub use config::{BrokerConfig, BusConfig, DispatchConfig, DispatchMode, LifecycleConfig, StoreConfig};
pub use event::{into_payload, Event, EventId, Payload, Priority, PublishOptions};
pub use pattern::Pattern;
pub use result::{EventResult, EventStatus};
pub use subscription::{Retention, SubscribeOptions, SubscriptionId};
