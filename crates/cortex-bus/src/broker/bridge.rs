//! # Bridge Between Bus and Broker
//!
//! ## Outbound
//!
//! `publish` stamps the event with `origin = node_id` and puts it on a
//! bounded queue without waiting. A pump task drains the queue into the
//! transport. When the transport fails the bridge is marked disconnected,
//! the error is counted, and the event is dropped; reconnects are attempted
//! at most once per `reconnect_interval`.
//!
//! ## Inbound
//!
//! Each `subscribe` spawns a listener that decodes broker messages and hands
//! them to an [`InboundSink`]. Malformed payloads and our own echoes are
//! counted and skipped.

use crate::broker::wire;
use crate::broker::{BrokerMessage, BrokerTransport, ORIGIN_KEY};
use crate::domain::config::BrokerConfig;
use crate::domain::event::Event;
use crate::domain::pattern::Pattern;
use crate::error::BrokerError;
use crate::metrics::Instruments;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where decoded inbound events go.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(&self, event: Event);
}

/// Point-in-time bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub connected: bool,
    /// Events handed to the transport successfully
    pub published: u64,
    /// Connect, publish and decode failures
    pub errors: u64,
    /// Inbound events delivered to the bus
    pub received: u64,
    /// Outbound events lost (queue full, broker down, shutdown)
    pub dropped: u64,
    /// Inbound payloads that could not be decoded
    pub malformed: u64,
    /// Inbound events skipped because this node published them
    pub echoes: u64,
}

#[derive(Default)]
struct Counters {
    connected: AtomicBool,
    published: AtomicU64,
    errors: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    echoes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            connected: self.connected.load(Ordering::SeqCst),
            published: self.published.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            echoes: self.echoes.load(Ordering::Relaxed),
        }
    }
}

pub struct BrokerBridge {
    transport: Arc<dyn BrokerTransport>,
    config: BrokerConfig,
    outbound: Mutex<Option<mpsc::Sender<Event>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    instruments: Instruments,
}

impl BrokerBridge {
    /// Connect (best effort) and start the outbound pump.
    ///
    /// A failed first connect leaves the bridge running in degraded mode;
    /// the pump retries later.
    pub(crate) async fn start(
        transport: Arc<dyn BrokerTransport>,
        config: BrokerConfig,
        instruments: Instruments,
    ) -> Arc<Self> {
        let counters = Arc::new(Counters::default());

        match transport.connect().await {
            Ok(()) => {
                counters.connected.store(true, Ordering::SeqCst);
                info!(broker = transport.name(), node_id = %config.node_id, "Broker bridge connected");
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                instruments.broker_error();
                warn!(
                    broker = transport.name(),
                    error = %e,
                    "Broker unavailable at start, continuing local-only"
                );
            }
        }

        let (sender, receiver) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let pump = tokio::spawn(run_pump(
            Arc::clone(&transport),
            receiver,
            Arc::clone(&counters),
            instruments.clone(),
            config.clone(),
        ));

        Arc::new(Self {
            transport,
            config,
            outbound: Mutex::new(Some(sender)),
            pump: Mutex::new(Some(pump)),
            listeners: Mutex::new(Vec::new()),
            counters,
            instruments,
        })
    }

    /// Queue `event` for the broker. Never waits.
    ///
    /// # Errors
    ///
    /// - `BrokerError::QueueFull` - outbound queue at capacity, event dropped
    /// - `BrokerError::Closed` - bridge already closed
    pub fn publish(&self, event: &Event) -> Result<(), BrokerError> {
        let stamped = event
            .clone()
            .with_metadata_entry(ORIGIN_KEY, Value::String(self.config.node_id.clone()));

        let guard = self.outbound.lock();
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(BrokerError::Closed);
        };

        match sender.try_send(stamped) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.instruments.broker_error();
                warn!(event_id = %event.id(), "Broker outbound queue full, event dropped");
                Err(BrokerError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(BrokerError::Closed)
            }
        }
    }

    /// Deliver broker events whose topic matches `pattern` to `sink`.
    pub async fn subscribe(
        &self,
        pattern: Pattern,
        sink: Arc<dyn InboundSink>,
    ) -> Result<(), BrokerError> {
        if !self.transport.is_connected() {
            self.reconnect().await?;
        }

        let receiver = match self.transport.subscribe(&pattern).await {
            Ok(receiver) => receiver,
            Err(e) => {
                self.record_error();
                return Err(e);
            }
        };

        let listener = tokio::spawn(run_listener(
            receiver,
            pattern.clone(),
            self.config.node_id.clone(),
            Arc::clone(&self.counters),
            self.instruments.clone(),
            sink,
        ));
        self.listeners.lock().push(listener);

        info!(broker = self.transport.name(), pattern = %pattern, "External subscription active");
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        match self.transport.connect().await {
            Ok(()) => {
                self.counters.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.counters.connected.store(false, Ordering::SeqCst);
                self.record_error();
                Err(e)
            }
        }
    }

    fn record_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.instruments.broker_error();
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    /// Stop accepting events, drain the queue for up to the configured
    /// drain timeout, stop listeners and close the transport.
    pub async fn close(&self) {
        drop(self.outbound.lock().take());

        let pump = self.pump.lock().take();
        if let Some(mut pump) = pump {
            let limit = self.config.drain_timeout();
            if tokio::time::timeout(limit, &mut pump).await.is_err() {
                warn!(
                    broker = self.transport.name(),
                    timeout_ms = self.config.drain_timeout_ms,
                    "Broker queue not drained before timeout"
                );
                pump.abort();
            }
        }

        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
        self.transport.close().await;
        self.counters.connected.store(false, Ordering::SeqCst);
        info!(broker = self.transport.name(), "Broker bridge closed");
    }
}

impl Drop for BrokerBridge {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().drain(..) {
            listener.abort();
        }
    }
}

async fn run_pump(
    transport: Arc<dyn BrokerTransport>,
    mut receiver: mpsc::Receiver<Event>,
    counters: Arc<Counters>,
    instruments: Instruments,
    config: BrokerConfig,
) {
    let mut last_attempt: Option<Instant> = None;

    while let Some(event) = receiver.recv().await {
        if !transport.is_connected() {
            let due = last_attempt.map_or(true, |at| at.elapsed() >= config.reconnect_interval());
            if !due {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            last_attempt = Some(Instant::now());
            match transport.connect().await {
                Ok(()) => {
                    counters.connected.store(true, Ordering::SeqCst);
                    info!(broker = transport.name(), "Broker reconnected");
                }
                Err(e) => {
                    counters.connected.store(false, Ordering::SeqCst);
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    instruments.broker_error();
                    warn!(broker = transport.name(), error = %e, "Broker reconnect failed");
                    continue;
                }
            }
        }

        let payload = match wire::encode(&event) {
            Ok(payload) => payload,
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                instruments.broker_error();
                warn!(event_id = %event.id(), error = %e, "Event not encodable for broker");
                continue;
            }
        };

        match transport.publish(event.event_type(), payload).await {
            Ok(()) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id(), event_type = %event.event_type(), "Event mirrored to broker");
            }
            Err(e) => {
                counters.connected.store(false, Ordering::SeqCst);
                counters.errors.fetch_add(1, Ordering::Relaxed);
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                instruments.broker_error();
                warn!(
                    broker = transport.name(),
                    event_id = %event.id(),
                    error = %e,
                    "Broker publish failed, continuing local-only"
                );
            }
        }
    }

    debug!(broker = transport.name(), "Broker pump stopped");
}

async fn run_listener(
    mut receiver: mpsc::Receiver<BrokerMessage>,
    pattern: Pattern,
    node_id: String,
    counters: Arc<Counters>,
    instruments: Instruments,
    sink: Arc<dyn InboundSink>,
) {
    while let Some(message) = receiver.recv().await {
        let event = match wire::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                counters.errors.fetch_add(1, Ordering::Relaxed);
                instruments.broker_error();
                warn!(topic = %message.topic, error = %e, "Dropping malformed broker message");
                continue;
            }
        };

        let origin = event.metadata().get(ORIGIN_KEY).and_then(Value::as_str);
        if origin == Some(node_id.as_str()) {
            counters.echoes.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        counters.received.fetch_add(1, Ordering::Relaxed);
        sink.deliver(event).await;
    }

    debug!(pattern = %pattern, "Broker listener stopped");
}
