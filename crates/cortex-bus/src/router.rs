//! # Router / Dispatcher
//!
//! Runs the middleware chain, stores the accepted event, resolves matching
//! registrations and invokes their handlers.
//!
//! ## Failure isolation
//!
//! Every handler call runs in its own Tokio task. An error, a panic or a
//! timeout becomes a FAILED (or RETRY) result for that handler alone and
//! never reaches the publisher.
//!
//! ## Ordering
//!
//! Handlers of one event are dispatched in resolve order (priority desc,
//! registration asc) and results come back in that order whatever the
//! completion order. Nothing orders separate events.

use crate::domain::config::DispatchMode;
use crate::domain::event::Event;
use crate::domain::result::{EventResult, EventStatus};
use crate::error::{BusError, HandlerError};
use crate::handler::{CancelSignal, EventHandler, HandlerContext};
use crate::metrics::Instruments;
use crate::middleware::{Middleware, Rejection};
use crate::registry::{Registration, SubscriptionRegistry};
use crate::store::EventStore;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Handler name recorded for middleware rejections.
pub const MIDDLEWARE_HANDLER_PREFIX: &str = "middleware:";

/// An accepted event as stored and delivered, with per-handler results in
/// dispatch order.
#[derive(Debug, Clone)]
pub struct Routed {
    pub event: Arc<Event>,
    pub results: Vec<EventResult>,
}

pub struct Router {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<EventStore>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    mode: DispatchMode,
    instruments: Instruments,
}

impl Router {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<EventStore>,
        mode: DispatchMode,
        instruments: Instruments,
    ) -> Self {
        Self {
            registry,
            store,
            middleware: RwLock::new(Vec::new()),
            mode,
            instruments,
        }
    }

    /// Append to the middleware chain.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "Middleware added");
        self.middleware.write().push(middleware);
    }

    #[must_use]
    pub fn middleware_count(&self) -> usize {
        self.middleware.read().len()
    }

    /// Run `event` through the chain in registration order.
    ///
    /// A middleware that alters the event's id, type or timestamp, or
    /// panics, is treated as having rejected it.
    pub fn apply_middleware(&self, event: Event) -> Result<Event, Rejection> {
        let chain = self.middleware.read().clone();
        let mut current = event;

        for middleware in chain {
            let before = (current.id(), current.event_type().to_string(), current.timestamp());
            current = match panic::catch_unwind(AssertUnwindSafe(|| middleware.process(current))) {
                Ok(outcome) => outcome?,
                Err(payload) => {
                    return Err(Rejection::new(
                        middleware.name(),
                        format!("middleware panicked: {}", panic_message(payload)),
                    ));
                }
            };
            if current.id() != before.0
                || current.event_type() != before.1
                || current.timestamp() != before.2
            {
                return Err(Rejection::new(
                    middleware.name(),
                    "middleware altered event identity",
                ));
            }
        }
        Ok(current)
    }

    /// Store and dispatch a new event.
    ///
    /// # Errors
    ///
    /// - `BusError::InvalidEvent` - empty or wildcard type
    /// - `BusError::Rejected` - refused by middleware (recorded as a single
    ///   FAILED result in the store)
    /// - `BusError::Store` - an event with this id is already stored
    pub async fn route(&self, event: Event) -> Result<Routed, BusError> {
        event.validate().map_err(BusError::InvalidEvent)?;

        let original = (self.middleware_count() > 0).then(|| event.clone());
        let event = match self.apply_middleware(event) {
            Ok(event) => event,
            Err(rejection) => {
                return Err(self.record_rejection(original, rejection));
            }
        };

        self.store.store_event(event.clone())?;
        self.instruments.published(event.event_type());

        let event = Arc::new(event);
        let results = self.dispatch(Arc::clone(&event)).await;
        self.record_results(&results);
        Ok(Routed { event, results })
    }

    /// Dispatch an already-stored event again without storing it anew.
    /// Middleware is not re-applied.
    pub async fn redeliver(&self, event: Event) -> Vec<EventResult> {
        self.instruments.redelivered(event.event_type());
        let results = self.dispatch(Arc::new(event)).await;
        self.record_results(&results);
        results
    }

    fn record_rejection(&self, original: Option<Event>, rejection: Rejection) -> BusError {
        let Some(event) = original else {
            // No middleware ran, so nothing could have rejected.
            return BusError::InvalidEvent("rejected without middleware".to_string());
        };
        let event_id = event.id();
        let event_type = event.event_type().to_string();

        warn!(
            event_id = %event_id,
            event_type = %event_type,
            middleware = %rejection.middleware,
            reason = %rejection.reason,
            "Event rejected by middleware"
        );
        self.instruments.rejected(&event_type, &rejection.middleware);

        match self.store.store_event(event) {
            Ok(()) => {
                let result = EventResult::failed(
                    event_id,
                    None,
                    format!("{MIDDLEWARE_HANDLER_PREFIX}{}", rejection.middleware),
                    rejection.reason.clone(),
                    Duration::ZERO,
                );
                if let Err(e) = self.store.store_result(result) {
                    debug!(event_id = %event_id, error = %e, "Rejection result not stored");
                }
            }
            Err(e) => {
                debug!(event_id = %event_id, error = %e, "Rejected event not stored");
            }
        }

        BusError::Rejected {
            event_id,
            middleware: rejection.middleware,
            reason: rejection.reason,
        }
    }

    fn record_results(&self, results: &[EventResult]) {
        for result in results {
            if let Err(e) = self.store.store_result(result.clone()) {
                // The event may have been evicted while handlers ran.
                debug!(event_id = %result.event_id, error = %e, "Result not stored");
            }
        }
    }

    async fn dispatch(&self, event: Arc<Event>) -> Vec<EventResult> {
        let claimed: Vec<(Arc<Registration>, Arc<dyn EventHandler>)> = self
            .registry
            .resolve(event.event_type())
            .into_iter()
            .filter_map(|registration| {
                let handler = registration.handler()?;
                registration.claim().then_some((registration, handler))
            })
            .collect();

        debug!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            handlers = claimed.len(),
            "Dispatching event"
        );

        let results = match self.mode {
            DispatchMode::Concurrent => {
                let calls = claimed.iter().map(|(registration, handler)| {
                    self.invoke(Arc::clone(&event), registration, Arc::clone(handler))
                });
                futures::future::join_all(calls).await
            }
            DispatchMode::Sequential => {
                let mut results = Vec::with_capacity(claimed.len());
                for (registration, handler) in &claimed {
                    results.push(
                        self.invoke(Arc::clone(&event), registration, Arc::clone(handler))
                            .await,
                    );
                }
                results
            }
        };

        for (registration, _) in &claimed {
            if registration.is_once() {
                self.registry.remove(registration.id());
            }
        }

        results
    }

    async fn invoke(
        &self,
        event: Arc<Event>,
        registration: &Registration,
        handler: Arc<dyn EventHandler>,
    ) -> EventResult {
        let (cancel, signal) = CancelSignal::new();
        let ctx = HandlerContext::new(registration.id(), signal);
        let started = Instant::now();

        let task_event = Arc::clone(&event);
        let mut task = tokio::spawn(async move { handler.handle(task_event, ctx).await });

        let joined = match event.timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    // Cooperative: the task keeps running until it notices.
                    let _ = cancel.send(true);
                    None
                }
            },
            None => Some(task.await),
        };
        let elapsed = started.elapsed();

        let event_id = event.id();
        let sub_id = registration.id();
        let name = registration.name();
        let result = match joined {
            Some(Ok(Ok(value))) => EventResult::completed(event_id, sub_id, name, value, elapsed),
            Some(Ok(Err(HandlerError::Retry(reason)))) => {
                retry_or_fail(&event, registration, reason, elapsed)
            }
            Some(Ok(Err(err))) => {
                EventResult::failed(event_id, Some(sub_id), name, err.to_string(), elapsed)
            }
            Some(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                EventResult::failed(
                    event_id,
                    Some(sub_id),
                    name,
                    format!("handler panicked: {message}"),
                    elapsed,
                )
            }
            Some(Err(join_err)) => EventResult::failed(
                event_id,
                Some(sub_id),
                name,
                format!("handler task cancelled: {join_err}"),
                elapsed,
            ),
            None => retry_or_fail(
                &event,
                registration,
                format!("timed out after {}ms", elapsed.as_millis()),
                elapsed,
            ),
        };

        self.instruments
            .handler(event.event_type(), result.status, result.processing_time);
        if result.status == EventStatus::Completed {
            debug!(event_id = %event_id, subscription_id = %sub_id, handler = name, "Handler completed");
        } else {
            warn!(
                event_id = %event_id,
                event_type = %event.event_type(),
                subscription_id = %sub_id,
                handler = name,
                status = %result.status,
                error = result.error.as_deref().unwrap_or_default(),
                "Handler did not complete"
            );
        }
        result
    }
}

fn retry_or_fail(
    event: &Event,
    registration: &Registration,
    reason: String,
    elapsed: Duration,
) -> EventResult {
    if event.can_retry() {
        EventResult::retry(event.id(), registration.id(), registration.name(), reason, elapsed)
    } else {
        EventResult::failed(
            event.id(),
            Some(registration.id()),
            registration.name(),
            format!("{reason} (retries exhausted)"),
            elapsed,
        )
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
