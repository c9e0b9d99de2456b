//! In-process broker adapter.
//!
//! Uses `tokio::sync::broadcast` for pub/sub semantics. Every connection
//! obtained through [`InMemoryBroker::connection`] shares one hub, so
//! several buses in one process see each other's events the way they would
//! through Redis pub/sub. [`InMemoryBroker::set_available`] simulates an
//! outage of the whole hub.

use crate::broker::{BrokerMessage, BrokerTransport};
use crate::domain::pattern::Pattern;
use crate::error::BrokerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Messages buffered per hub before slow listeners lag.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Messages buffered per subscription.
const SUBSCRIPTION_BUFFER: usize = 256;

struct Hub {
    sender: broadcast::Sender<BrokerMessage>,
    available: AtomicBool,
    delivered: AtomicU64,
}

pub struct InMemoryBroker {
    name: String,
    hub: Arc<Hub>,
    connected: AtomicBool,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let hub = Arc::new(Hub {
            sender,
            available: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
        });
        Self::attach(hub, 0)
    }

    fn attach(hub: Arc<Hub>, index: usize) -> Self {
        Self {
            name: format!("in-memory#{index}"),
            hub,
            connected: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Another client of the same hub.
    #[must_use]
    pub fn connection(&self) -> Self {
        let index = Arc::strong_count(&self.hub);
        Self::attach(Arc::clone(&self.hub), index)
    }

    /// Bring the whole hub up or down.
    pub fn set_available(&self, available: bool) {
        self.hub.available.store(available, Ordering::SeqCst);
        debug!(available, "In-memory broker availability changed");
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.hub.available.load(Ordering::SeqCst)
    }

    /// Messages accepted by the hub from any connection.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.hub.delivered.load(Ordering::Relaxed)
    }

    /// Put a raw payload on the hub, bypassing connection state.
    pub fn inject(&self, topic: impl Into<String>, payload: Vec<u8>) {
        let _ = self.hub.sender.send(BrokerMessage::new(topic, payload));
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        if !self.is_available() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(BrokerError::Unavailable("in-memory hub offline".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        if !self.is_available() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(BrokerError::Unavailable("in-memory hub offline".to_string()));
        }

        // No receivers is not an error for pub/sub.
        let _ = self.hub.sender.send(BrokerMessage::new(topic, payload));
        self.hub.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &Pattern,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let mut receiver = self.hub.sender.subscribe();
        let (sender, output) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let hub = Arc::clone(&self.hub);
        let pattern = pattern.clone();

        let listener = tokio::spawn(async move {
            loop {
                let message = match receiver.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!(lagged = count, "Broker subscription lagged, messages dropped");
                        continue;
                    }
                };
                // Messages published during an outage are lost.
                if !hub.available.load(Ordering::SeqCst) || !pattern.matches(&message.topic) {
                    continue;
                }
                if sender.send(message).await.is_err() {
                    return;
                }
            }
        });
        self.listeners.lock().push(listener);

        Ok(output)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
    }
}
