//! # Event Bus
//!
//! The single entry point: lifecycle, publish, subscribe, middleware,
//! queries and stats. Composes the store, registry, router and (optionally)
//! the broker bridge.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start()──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//! ```
//!
//! - `publish` before `start` fails fast with `BusError::NotStarted`
//! - `start` is idempotent while running; there is no restart after `stop`
//! - `stop` waits for in-flight publishes (bounded by the shutdown timeout),
//!   closes the broker bridge and flushes the journal
//! - dispatch runs in its own task, so dropping a `publish` future does not
//!   cut it short: results are still recorded and `stop` still waits for it
//! - the store stays queryable after `stop`

use crate::broker::{BridgeStats, BrokerBridge, BrokerTransport, InboundSink};
use crate::domain::config::BusConfig;
use crate::domain::event::{into_payload, Event, EventId, PublishOptions};
use crate::domain::pattern::Pattern;
use crate::domain::result::EventResult;
use crate::domain::subscription::SubscribeOptions;
use crate::error::{BrokerError, BusError, StoreError};
use crate::handler::{handler_fn, EventHandler, HandlerContext, HandlerOutcome};
use crate::metrics::{Instruments, MetricsRecorder, NoOpMetrics};
use crate::middleware::Middleware;
use crate::registry::{HandlerRef, SubscriptionHandle, SubscriptionRegistry};
use crate::router::Router;
use crate::store::{EventStore, Journal};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Metadata key set on events delivered by `redeliver`.
pub const REPLAYED_KEY: &str = "replayed";

/// Bus lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// What `publish` returns: the stored event's id and one result per
/// matching handler, in dispatch order.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event_id: EventId,
    pub results: Vec<EventResult>,
}

impl Delivery {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(EventResult::is_success)
    }
}

/// Bus-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusStats {
    pub state: BusState,
    pub running: bool,
    pub events_published: u64,
    pub events_rejected: u64,
    pub events_redelivered: u64,
    pub handler_invocations: u64,
    pub handler_successes: u64,
    pub handler_failures: u64,
    pub handler_retries: u64,
    /// Completed over all handler calls (1.0 when nothing ran yet)
    pub success_rate: f64,
    pub active_subscriptions: usize,
    pub pruned_subscriptions: u64,
    pub stored_events: usize,
    pub evicted_events: u64,
    pub journal_errors: u64,
    pub broker_connected: bool,
    pub broker_published: u64,
    pub broker_errors: u64,
    pub broker_received: u64,
    pub broker_dropped: u64,
    pub broker_malformed: u64,
}

struct BusInner {
    config: BusConfig,
    state: RwLock<BusState>,
    lifecycle: tokio::sync::Mutex<()>,
    store: Arc<EventStore>,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<Router>,
    instruments: Instruments,
    transport: Option<Arc<dyn BrokerTransport>>,
    bridge: RwLock<Option<Arc<BrokerBridge>>>,
    in_flight: AtomicUsize,
    idle: Notify,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

/// Counts a publish as in flight until dropped. Owned, so it can move into
/// the dispatch task.
struct InFlight {
    inner: Arc<BusInner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Builder for [`EventBus`].
#[derive(Default)]
pub struct EventBusBuilder {
    config: BusConfig,
    transport: Option<Arc<dyn BrokerTransport>>,
    recorder: Option<Arc<dyn MetricsRecorder>>,
}

impl EventBusBuilder {
    #[must_use]
    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirror events through `transport` (if `broker.enabled`).
    #[must_use]
    pub fn with_broker(mut self, transport: Arc<dyn BrokerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Forward metrics to an external recorder.
    #[must_use]
    pub fn with_metrics_recorder(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Validate the configuration and assemble the bus.
    pub fn build(self) -> Result<EventBus, BusError> {
        self.config.validate()?;

        let instruments = Instruments::new(
            self.recorder
                .unwrap_or_else(|| Arc::new(NoOpMetrics) as Arc<dyn MetricsRecorder>),
        );
        let store = Arc::new(EventStore::new(self.config.store.max_events));
        let registry = Arc::new(SubscriptionRegistry::new());
        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            self.config.dispatch.mode,
            instruments.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(EventBus {
            inner: Arc::new(BusInner {
                config: self.config,
                state: RwLock::new(BusState::Created),
                lifecycle: tokio::sync::Mutex::new(()),
                store,
                registry,
                router,
                instruments,
                transport: self.transport,
                bridge: RwLock::new(None),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                shutdown,
                sweeper: Mutex::new(None),
            }),
        })
    }
}

/// Process-local publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Bus with `config` and no broker.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        Self::builder().with_config(config).build()
    }

    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> BusState {
        *self.inner.state.read()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == BusState::Running
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the journal, connect the broker bridge and start the
    /// dead-subscriber sweep.
    ///
    /// # Errors
    ///
    /// - `BusError::Stopped` - the bus was stopped (no restart)
    /// - `BusError::Store` - the journal could not be opened
    pub async fn start(&self) -> Result<(), BusError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        match self.state() {
            BusState::Running => return Ok(()),
            BusState::Stopping | BusState::Stopped => return Err(BusError::Stopped),
            BusState::Created => {}
        }

        let store_config = &self.inner.config.store;
        if let Some(path) = &store_config.journal_path {
            let journal = Journal::open(path, store_config.journal_queue_capacity).await?;
            self.inner.store.attach_journal(Arc::new(journal));
        }

        let broker_config = &self.inner.config.broker;
        if let (Some(transport), true) = (&self.inner.transport, broker_config.enabled) {
            let bridge = BrokerBridge::start(
                Arc::clone(transport),
                broker_config.clone(),
                self.inner.instruments.clone(),
            )
            .await;
            *self.inner.bridge.write() = Some(bridge);
        }

        if let Some(period) = self.inner.config.lifecycle.prune_interval() {
            let registry = Arc::clone(&self.inner.registry);
            let mut shutdown = self.inner.shutdown.subscribe();
            let sweeper = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            registry.prune();
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            });
            *self.inner.sweeper.lock() = Some(sweeper);
        }

        *self.inner.state.write() = BusState::Running;
        info!(
            node_id = %broker_config.node_id,
            broker = self.inner.bridge.read().is_some(),
            journal = store_config.journal_path.is_some(),
            "Event bus started"
        );
        Ok(())
    }

    /// Stop accepting publishes and wind down. Idempotent.
    ///
    /// In-flight publishes still running after the shutdown timeout keep
    /// running and record their results; `stop` just no longer waits.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let mut state = self.inner.state.write();
            match *state {
                BusState::Created => {
                    *state = BusState::Stopped;
                    return;
                }
                BusState::Stopping | BusState::Stopped => return,
                BusState::Running => *state = BusState::Stopping,
            }
        }
        info!("Event bus stopping");

        let limit = self.inner.config.lifecycle.shutdown_timeout();
        if tokio::time::timeout(limit, self.wait_idle()).await.is_err() {
            warn!(
                in_flight = self.inner.in_flight.load(Ordering::SeqCst),
                timeout_ms = self.inner.config.lifecycle.shutdown_timeout_ms,
                "In-flight publishes did not finish before shutdown timeout"
            );
        }

        let _ = self.inner.shutdown.send(true);
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        let bridge = self.inner.bridge.read().clone();
        if let Some(bridge) = bridge {
            bridge.close().await;
        }

        if let Some(journal) = self.inner.store.journal() {
            journal.close().await;
        }

        *self.inner.state.write() = BusState::Stopped;
        info!(stored_events = self.inner.store.len(), "Event bus stopped");
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn enter(&self) -> Result<InFlight, BusError> {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight {
            inner: Arc::clone(&self.inner),
        };
        match self.state() {
            BusState::Running => Ok(guard),
            BusState::Created => Err(BusError::NotStarted),
            BusState::Stopping => Err(BusError::ShuttingDown),
            BusState::Stopped => Err(BusError::Stopped),
        }
    }

    // =========================================================================
    // Publish
    // =========================================================================

    /// Publish a new event built from `event_type`, `data` and `options`.
    ///
    /// Object `data` becomes the payload; other JSON values are wrapped
    /// under `"value"`.
    ///
    /// # Errors
    ///
    /// Only lifecycle misuse, an invalid event type or a middleware
    /// rejection. Handler and broker failures are reported through results
    /// and stats.
    pub async fn publish(
        &self,
        event_type: impl Into<String>,
        data: Value,
        options: PublishOptions,
    ) -> Result<Delivery, BusError> {
        self.publish_event(options.into_event(event_type, into_payload(data)))
            .await
    }

    /// Publish a prebuilt event.
    ///
    /// Routing runs on a spawned task holding the in-flight guard; if the
    /// returned future is dropped, the task still records every result.
    pub async fn publish_event(&self, event: Event) -> Result<Delivery, BusError> {
        let in_flight = self.enter()?;
        let task = tokio::spawn(async move {
            let inner = &in_flight.inner;
            let routed = inner.router.route(event).await?;

            let bridge = inner.bridge.read().clone();
            if let Some(bridge) = bridge {
                if let Err(e) = bridge.publish(&routed.event) {
                    debug!(event_id = %routed.event.id(), error = %e, "Event not mirrored to broker");
                }
            }

            Ok::<_, BusError>(Delivery {
                event_id: routed.event.id(),
                results: routed.results,
            })
        });
        join_dispatch(task).await
    }

    // =========================================================================
    // Subscribe
    // =========================================================================

    /// Subscribe `handler` to `pattern` (`type`, `prefix*` or `*`).
    ///
    /// Unless `options.retain()` is set, the caller keeps ownership of the
    /// handler and the subscription lapses once the last `Arc` is dropped.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: &Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        let pattern = Pattern::parse(pattern)?;
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| handler.name().to_string());
        Ok(self.inner.registry.subscribe(
            pattern,
            HandlerRef::new(handler, options.retention),
            name,
            &options,
        ))
    }

    /// Subscribe a closure. The registry owns it until unsubscribed.
    pub fn subscribe_fn<F, Fut>(
        &self,
        pattern: &str,
        func: F,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(Arc<Event>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send + 'static,
    {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("fn:{}", pattern.trim()));
        let handler = handler_fn(name, func);
        self.subscribe(pattern, &handler, options.retain())
    }

    /// Remove a subscription. `false` if it was already removed or belongs
    /// to another bus.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.belongs_to(&self.inner.registry) && handle.unsubscribe()
    }

    /// Append a middleware to the pre-dispatch chain.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.router.add_middleware(middleware);
    }

    /// Deliver broker events matching `pattern` to local handlers.
    ///
    /// Inbound events are stored like local ones but are not mirrored back.
    ///
    /// # Errors
    ///
    /// `BusError::NotStarted` before `start`, `BusError::Broker` without a
    /// broker or when the broker refuses the subscription.
    pub async fn subscribe_external(&self, pattern: &str) -> Result<(), BusError> {
        let pattern = Pattern::parse(pattern)?;
        let _in_flight = self.enter()?;
        let bridge = self.inner.bridge.read().clone();
        let Some(bridge) = bridge else {
            return Err(BrokerError::Unavailable("no broker configured".to_string()).into());
        };

        let sink = Arc::new(BusSink {
            bus: Arc::downgrade(&self.inner),
        });
        bridge.subscribe(pattern, sink).await?;
        Ok(())
    }

    async fn deliver_inbound(&self, event: Event) {
        let Ok(in_flight) = self.enter() else {
            debug!(event_id = %event.id(), "Inbound event ignored, bus not running");
            return;
        };
        let event_id = event.id();
        // Detached from the listener so closing the bridge cannot cut it short.
        let task = tokio::spawn(async move { in_flight.inner.router.route(event).await });
        match join_dispatch(task).await {
            Ok(routed) => {
                debug!(event_id = %event_id, handlers = routed.results.len(), "Inbound event delivered");
            }
            Err(BusError::Store(StoreError::DuplicateEvent(_))) => {
                debug!(event_id = %event_id, "Inbound event already stored");
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Inbound event not delivered");
            }
        }
    }

    // =========================================================================
    // Replay and queries
    // =========================================================================

    /// Stored events in ascending timestamp order.
    #[must_use]
    pub fn replay(&self, event_type: Option<&str>) -> Vec<Event> {
        self.inner.store.replay(event_type)
    }

    /// Dispatch stored events again, oldest first, marked with metadata
    /// `replayed = true`. Results replace the earlier ones per handler.
    pub async fn redeliver(&self, event_type: Option<&str>) -> Result<Vec<Delivery>, BusError> {
        let in_flight = self.enter()?;
        let events = self.inner.store.replay(event_type);
        info!(count = events.len(), event_type = ?event_type, "Redelivering stored events");

        let task = tokio::spawn(async move {
            let mut deliveries = Vec::with_capacity(events.len());
            for event in events {
                let event = event.with_metadata_entry(REPLAYED_KEY, Value::Bool(true));
                let event_id = event.id();
                let results = in_flight.inner.router.redeliver(event).await;
                deliveries.push(Delivery { event_id, results });
            }
            Ok::<_, BusError>(deliveries)
        });
        join_dispatch(task).await
    }

    /// Load a journal file into the store. Returns the number of events
    /// restored; nothing is dispatched.
    pub fn restore_journal(&self, path: impl AsRef<Path>) -> Result<usize, BusError> {
        let entries = Journal::restore(path)?;
        Ok(self.inner.store.restore_from_journal(entries))
    }

    #[must_use]
    pub fn get_event(&self, id: &EventId) -> Option<Event> {
        self.inner.store.get_event(id)
    }

    #[must_use]
    pub fn get_result(&self, id: &EventId) -> Option<EventResult> {
        self.inner.store.get_result(id)
    }

    #[must_use]
    pub fn get_results(&self, id: &EventId) -> Vec<EventResult> {
        self.inner.store.get_results(id)
    }

    #[must_use]
    pub fn query_by_type(&self, event_type: &str, limit: usize) -> Vec<Event> {
        self.inner.store.query_by_type(event_type, limit)
    }

    #[must_use]
    pub fn query_by_source(&self, source: &str, limit: usize) -> Vec<Event> {
        self.inner.store.query_by_source(source, limit)
    }

    #[must_use]
    pub fn query_by_correlation(&self, correlation_id: &str, limit: usize) -> Vec<Event> {
        self.inner.store.query_by_correlation(correlation_id, limit)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let metrics = self.inner.instruments.metrics.snapshot();
        let broker = self
            .inner
            .bridge
            .read()
            .as_ref()
            .map(|bridge| bridge.stats())
            .unwrap_or_default();
        let state = self.state();

        BusStats {
            state,
            running: state == BusState::Running,
            events_published: metrics.events_published,
            events_rejected: metrics.events_rejected,
            events_redelivered: metrics.events_redelivered,
            handler_invocations: metrics.handler_invocations,
            handler_successes: metrics.handler_successes,
            handler_failures: metrics.handler_failures,
            handler_retries: metrics.handler_retries,
            success_rate: metrics.success_rate,
            active_subscriptions: self.inner.registry.active_count(),
            pruned_subscriptions: self.inner.registry.pruned_count(),
            stored_events: self.inner.store.len(),
            evicted_events: self.inner.store.evicted(),
            journal_errors: self.inner.store.journal_errors(),
            broker_connected: broker.connected,
            broker_published: broker.published,
            broker_errors: broker.errors,
            broker_received: broker.received,
            broker_dropped: broker.dropped,
            broker_malformed: broker.malformed,
        }
    }

    /// Bridge counters, when a broker is attached and started.
    #[must_use]
    pub fn broker_stats(&self) -> Option<BridgeStats> {
        self.inner.bridge.read().as_ref().map(|bridge| bridge.stats())
    }
}

async fn join_dispatch<T>(task: JoinHandle<Result<T, BusError>>) -> Result<T, BusError> {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(BusError::Dispatch(e.to_string())),
    }
}

/// Routes inbound broker events into the bus without keeping it alive.
struct BusSink {
    bus: Weak<BusInner>,
}

#[async_trait]
impl InboundSink for BusSink {
    async fn deliver(&self, event: Event) {
        if let Some(inner) = self.bus.upgrade() {
            EventBus { inner }.deliver_inbound(event).await;
        }
    }
}
