//! # Subscription Registry
//!
//! Maps patterns to handler registrations.
//!
//! ## Indexing
//!
//! - Exact patterns: `HashMap<type, ids>` lookup
//! - Prefix patterns: linear scan (few in practice)
//! - Global `*`: always included
//!
//! ## Handler ownership
//!
//! By default the registry holds a `Weak` reference and the subscriber owns
//! the handler's `Arc`. When the owner drops it, the next `resolve` (or the
//! periodic `prune`) removes the registration. This is a safety net; the
//! primary mechanism is an explicit [`SubscriptionHandle::unsubscribe`] or a
//! [`SubscriptionGuard`].

use crate::domain::event::Priority;
use crate::domain::pattern::Pattern;
use crate::domain::subscription::{Retention, SubscribeOptions, SubscriptionId};
use crate::handler::EventHandler;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// How a registration refers to its handler.
#[derive(Clone)]
pub enum HandlerRef {
    Strong(Arc<dyn EventHandler>),
    Weak(Weak<dyn EventHandler>),
}

impl HandlerRef {
    #[must_use]
    pub fn new(handler: &Arc<dyn EventHandler>, retention: Retention) -> Self {
        match retention {
            Retention::Strong => Self::Strong(Arc::clone(handler)),
            Retention::Weak => Self::Weak(Arc::downgrade(handler)),
        }
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<dyn EventHandler>> {
        match self {
            Self::Strong(handler) => Some(Arc::clone(handler)),
            Self::Weak(handler) => handler.upgrade(),
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(handler) => handler.strong_count() > 0,
        }
    }
}

/// One active subscription.
pub struct Registration {
    id: SubscriptionId,
    pattern: Pattern,
    priority: Priority,
    once: bool,
    fired: AtomicBool,
    name: String,
    handler: HandlerRef,
}

impl Registration {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn is_once(&self) -> bool {
        self.once
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.handler.upgrade()
    }

    /// Reserve the right to deliver. Always true for repeating
    /// subscriptions; true exactly once for `once` subscriptions.
    pub fn claim(&self) -> bool {
        !self.once
            || self
                .fired
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    fn is_deliverable(&self) -> bool {
        self.handler.is_alive() && !(self.once && self.fired.load(Ordering::Acquire))
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<SubscriptionId, Arc<Registration>>,
    exact: HashMap<String, Vec<SubscriptionId>>,
    prefix: Vec<SubscriptionId>,
    global: Vec<SubscriptionId>,
}

impl RegistryInner {
    fn remove(&mut self, id: SubscriptionId) -> Option<Arc<Registration>> {
        let registration = self.entries.remove(&id)?;
        match &registration.pattern {
            Pattern::All => self.global.retain(|other| *other != id),
            Pattern::Prefix(_) => self.prefix.retain(|other| *other != id),
            Pattern::Exact(event_type) => {
                if let Some(ids) = self.exact.get_mut(event_type) {
                    ids.retain(|other| *other != id);
                    if ids.is_empty() {
                        self.exact.remove(event_type);
                    }
                }
            }
        }
        Some(registration)
    }
}

/// Thread-safe pattern -> handler registry.
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
    next_id: AtomicU64,
    pruned: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            next_id: AtomicU64::new(1),
            pruned: AtomicU64::new(0),
        }
    }

    /// Register `handler` under `pattern`.
    pub fn subscribe(
        self: &Arc<Self>,
        pattern: Pattern,
        handler: HandlerRef,
        name: String,
        options: &SubscribeOptions,
    ) -> SubscriptionHandle {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(Registration {
            id,
            pattern: pattern.clone(),
            priority: options.priority,
            once: options.once,
            fired: AtomicBool::new(false),
            name,
            handler,
        });

        {
            let mut inner = self.inner.write();
            match &pattern {
                Pattern::All => inner.global.push(id),
                Pattern::Prefix(_) => inner.prefix.push(id),
                Pattern::Exact(event_type) => {
                    inner.exact.entry(event_type.clone()).or_default().push(id);
                }
            }
            inner.entries.insert(id, registration);
        }

        debug!(
            subscription_id = %id,
            pattern = %pattern,
            priority = %options.priority,
            once = options.once,
            "Subscription registered"
        );

        SubscriptionHandle {
            id,
            pattern,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.write().remove(id).is_some();
        if removed {
            debug!(subscription_id = %id, "Subscription removed");
        }
        removed
    }

    /// Deliverable registrations for `event_type`, highest priority first,
    /// registration order among equals.
    ///
    /// Registrations whose weak owner is gone are pruned on the way.
    #[must_use]
    pub fn resolve(&self, event_type: &str) -> Vec<Arc<Registration>> {
        let mut matched = Vec::new();
        let mut dead = Vec::new();
        {
            let inner = self.inner.read();
            let exact = inner.exact.get(event_type).into_iter().flatten();
            let prefix = inner.prefix.iter().filter(|id| {
                inner
                    .entries
                    .get(*id)
                    .is_some_and(|r| r.pattern.matches(event_type))
            });

            for id in exact.chain(prefix).chain(inner.global.iter()) {
                let Some(registration) = inner.entries.get(id) else {
                    continue;
                };
                if !registration.handler.is_alive() {
                    dead.push(*id);
                } else if registration.is_deliverable() {
                    matched.push(Arc::clone(registration));
                }
            }
        }

        if !dead.is_empty() {
            self.remove_dead(&dead);
        }

        matched.sort_by_key(|r| (Reverse(r.priority), r.id));
        matched
    }

    /// Drop every registration whose weak owner is gone. Returns how many.
    pub fn prune(&self) -> usize {
        let dead: Vec<SubscriptionId> = self
            .inner
            .read()
            .entries
            .values()
            .filter(|r| !r.handler.is_alive())
            .map(|r| r.id)
            .collect();
        self.remove_dead(&dead)
    }

    fn remove_dead(&self, ids: &[SubscriptionId]) -> usize {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for id in ids {
            // Re-check under the write lock; a racing unsubscribe may have won.
            if inner.entries.get(id).is_some_and(|r| !r.handler.is_alive()) {
                inner.remove(*id);
                removed += 1;
            }
        }
        drop(inner);

        if removed > 0 {
            self.pruned.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Pruned subscriptions with dropped handlers");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    /// Registrations whose handler is still reachable.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .filter(|r| r.handler.is_alive())
            .count()
    }

    /// Registrations removed because their owner dropped the handler.
    #[must_use]
    pub fn pruned_count(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }
}

/// Token returned by `subscribe`.
///
/// Cloneable; `unsubscribe` is idempotent across all clones.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    pattern: Pattern,
    registry: Weak<SubscriptionRegistry>,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Remove the subscription. Returns `true` only for the call that
    /// actually removed it.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }

    /// Whether the subscription is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.id))
    }

    pub(crate) fn belongs_to(&self, registry: &Arc<SubscriptionRegistry>) -> bool {
        std::ptr::eq(self.registry.as_ptr(), Arc::as_ptr(registry))
    }

    /// Tie the subscription's lifetime to the returned guard.
    #[must_use]
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard { handle: Some(self) }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Unsubscribes when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    handle: Option<SubscriptionHandle>,
}

impl SubscriptionGuard {
    #[must_use]
    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref()
    }

    /// Disarm the guard and hand back the plain handle.
    #[must_use]
    pub fn release(mut self) -> Option<SubscriptionHandle> {
        self.handle.take()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.unsubscribe() {
                debug!(subscription_id = %handle.id, "Subscription guard dropped");
            }
        }
    }
}
