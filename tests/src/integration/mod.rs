//! # Integration Scenarios
//!
//! Each module drives a real [`cortex_bus::EventBus`] through one concern.

pub mod dispatch;
pub mod lifecycle;
pub mod persistence;
pub mod properties;
pub mod subscriptions;
