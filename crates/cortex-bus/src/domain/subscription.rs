//! Subscription identity and options.

use crate::domain::event::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration-ordered subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// How the registry holds on to a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Retention {
    /// The subscriber owns the handler; the registry holds a weak reference
    /// and drops the registration once the owner is gone.
    #[default]
    Weak,
    /// The registry keeps the handler alive until unsubscribed.
    Strong,
}

/// Options recognised by `EventBus::subscribe`.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub(crate) priority: Priority,
    pub(crate) once: bool,
    pub(crate) retention: Retention,
    pub(crate) name: Option<String>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Remove the subscription after its first delivery.
    #[must_use]
    pub fn with_once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Keep a strong reference to the handler.
    #[must_use]
    pub fn retain(mut self) -> Self {
        self.retention = Retention::Strong;
        self
    }

    /// Override the handler name recorded in results.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
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
    pub fn retention(&self) -> Retention {
        self.retention
    }
}
