//! # Broker Bridge
//!
//! Optional mirroring of local events to an external pub/sub system and
//! translation of external events back into local ones.
//!
//! ## Architecture
//!
//! ```text
//! EventBus ──publish──▶ BrokerBridge ──queue──▶ pump task ──▶ BrokerTransport
//!    ▲                                                              │
//!    └──────── InboundSink ◀── listener task ◀── subscribe(pattern) ┘
//! ```
//!
//! [`BrokerTransport`] is the port. [`InMemoryBroker`] is the in-process
//! adapter; `RedisTransport` (feature `redis`) crosses processes through
//! Redis pub/sub.

pub mod bridge;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod wire;

pub use bridge::{BridgeStats, BrokerBridge, InboundSink};
pub use memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisTransport;
pub use wire::{decode, encode};

use crate::domain::pattern::Pattern;
use crate::error::BrokerError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Metadata key carrying the node id of the bus that mirrored an event.
pub const ORIGIN_KEY: &str = "origin";

/// A raw message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Routing key (the event type for events this crate publishes).
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Connection to an external message broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Establish (or re-establish) the connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    /// Publish `payload` under `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Receive messages whose topic matches `pattern`.
    async fn subscribe(&self, pattern: &Pattern)
        -> Result<mpsc::Receiver<BrokerMessage>, BrokerError>;

    /// Drop the connection and every subscription.
    async fn close(&self);
}
