//! # Event Handlers
//!
//! A handler receives a shared read-only view of the event plus a
//! [`HandlerContext`] carrying its cancel signal. Cancellation is
//! cooperative: the dispatcher flips the signal when the event's timeout
//! expires and stops waiting, but never aborts the handler's task.

use crate::domain::event::Event;
use crate::domain::subscription::SubscriptionId;
use crate::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// What a handler returns: an optional result payload or an error.
pub type HandlerOutcome = Result<Option<Value>, HandlerError>;

/// A callback invoked for events matching its subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome;

    /// Name recorded in results.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Cooperative cancellation signal handed to each handler invocation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub(crate) fn new() -> (watch::Sender<bool>, Self) {
        let (sender, receiver) = watch::channel(false);
        (sender, Self { receiver })
    }

    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if it never is.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                // Sender gone without cancelling.
                if *self.receiver.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    subscription_id: SubscriptionId,
    cancel: CancelSignal,
}

impl HandlerContext {
    #[must_use]
    pub fn new(subscription_id: SubscriptionId, cancel: CancelSignal) -> Self {
        Self {
            subscription_id,
            cancel,
        }
    }

    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}

/// Closure-backed handler.
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome {
        (self.func)(event, ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    Arc::new(FnHandler::new(name, func))
}
