//! # Middleware
//!
//! Ordered pre-dispatch transforms. Each middleware gets the event by value
//! and returns it (possibly with new data, metadata or priority) or a
//! [`Rejection`]. Middleware must not touch the store or registry, and may
//! not change an event's id, type or timestamp; the router treats such a
//! change as a rejection. A panic inside `process` is caught and also
//! becomes a rejection.

use crate::domain::event::Event;
use crate::domain::pattern::Pattern;
use crate::error::BusError;
use serde_json::Value;

/// Why a middleware refused an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub middleware: String,
    pub reason: String,
}

impl Rejection {
    pub fn new(middleware: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            middleware: middleware.into(),
            reason: reason.into(),
        }
    }
}

pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, event: Event) -> Result<Event, Rejection>;
}

/// Closure-backed middleware.
pub struct FnMiddleware<F> {
    name: String,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(Event) -> Result<Event, String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Event) -> Result<Event, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, event: Event) -> Result<Event, Rejection> {
        (self.func)(event).map_err(|reason| Rejection::new(self.name.clone(), reason))
    }
}

/// Allow/deny list over event types.
///
/// An event is rejected if it matches any deny pattern, or if allow
/// patterns exist and it matches none of them.
#[derive(Debug, Clone, Default)]
pub struct TypeGuard {
    allow: Vec<Pattern>,
    deny: Vec<Pattern>,
}

impl TypeGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, pattern: &str) -> Result<Self, BusError> {
        self.allow.push(Pattern::parse(pattern)?);
        Ok(self)
    }

    pub fn deny(mut self, pattern: &str) -> Result<Self, BusError> {
        self.deny.push(Pattern::parse(pattern)?);
        Ok(self)
    }
}

impl Middleware for TypeGuard {
    fn name(&self) -> &str {
        "type-guard"
    }

    fn process(&self, event: Event) -> Result<Event, Rejection> {
        let event_type = event.event_type();
        if let Some(pattern) = self.deny.iter().find(|p| p.matches(event_type)) {
            return Err(Rejection::new(
                self.name(),
                format!("type '{event_type}' denied by '{pattern}'"),
            ));
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|p| p.matches(event_type)) {
            return Err(Rejection::new(
                self.name(),
                format!("type '{event_type}' not in allow list"),
            ));
        }
        Ok(event)
    }
}

/// Stamps a fixed metadata entry on every event, leaving existing keys alone.
#[derive(Debug, Clone)]
pub struct MetadataStamp {
    key: String,
    value: Value,
}

impl MetadataStamp {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl Middleware for MetadataStamp {
    fn name(&self) -> &str {
        "metadata-stamp"
    }

    fn process(&self, event: Event) -> Result<Event, Rejection> {
        if event.metadata().contains_key(&self.key) {
            return Ok(event);
        }
        Ok(event.with_metadata_entry(self.key.clone(), self.value.clone()))
    }
}
