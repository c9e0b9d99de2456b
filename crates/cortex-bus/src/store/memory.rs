//! # Event Store
//!
//! In-memory record of every accepted event and its per-handler results,
//! indexed by type, source and correlation id.
//!
//! ## Concurrency
//!
//! One `RwLock` guards all indices so a store and its index updates are a
//! single linearizable step. Readers clone out of the lock.
//!
//! ## Bounded history
//!
//! With `max_events > 0`, storing event N+1 evicts the oldest event together
//! with its results and index entries.

use crate::domain::event::{Event, EventId};
use crate::domain::result::EventResult;
use crate::error::StoreError;
use crate::store::journal::{Journal, JournalEntry};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

struct StoredEvent {
    event: Event,
    sequence: u64,
    results: Vec<EventResult>,
    /// Index into `results` of the most recently recorded one.
    latest: Option<usize>,
}

#[derive(Default)]
struct StoreInner {
    events: HashMap<EventId, StoredEvent>,
    /// Insertion order, oldest first.
    order: VecDeque<EventId>,
    by_type: HashMap<String, VecDeque<EventId>>,
    by_source: HashMap<String, VecDeque<EventId>>,
    by_correlation: HashMap<String, VecDeque<EventId>>,
    next_sequence: u64,
    evicted: u64,
}

impl StoreInner {
    fn insert(&mut self, event: Event) -> Result<(), StoreError> {
        let id = event.id();
        if self.events.contains_key(&id) {
            return Err(StoreError::DuplicateEvent(id));
        }

        self.order.push_back(id);
        self.by_type
            .entry(event.event_type().to_string())
            .or_default()
            .push_back(id);
        self.by_source
            .entry(event.source().to_string())
            .or_default()
            .push_back(id);
        if let Some(correlation_id) = event.correlation_id() {
            self.by_correlation
                .entry(correlation_id.to_string())
                .or_default()
                .push_back(id);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.events.insert(
            id,
            StoredEvent {
                event,
                sequence,
                results: Vec::new(),
                latest: None,
            },
        );
        Ok(())
    }

    fn record_result(&mut self, result: EventResult) -> Result<(), StoreError> {
        let stored = self
            .events
            .get_mut(&result.event_id)
            .ok_or(StoreError::UnknownEvent(result.event_id))?;

        let existing = stored
            .results
            .iter()
            .position(|r| r.subscription_id == result.subscription_id && r.handler == result.handler);
        let index = match existing {
            Some(index) => {
                stored.results[index] = result;
                index
            }
            None => {
                stored.results.push(result);
                stored.results.len() - 1
            }
        };
        stored.latest = Some(index);
        Ok(())
    }

    fn evict_to(&mut self, max_events: usize) {
        if max_events == 0 {
            return;
        }
        while self.order.len() > max_events {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            let Some(stored) = self.events.remove(&id) else {
                continue;
            };
            remove_from_index(&mut self.by_type, stored.event.event_type(), id);
            remove_from_index(&mut self.by_source, stored.event.source(), id);
            if let Some(correlation_id) = stored.event.correlation_id() {
                remove_from_index(&mut self.by_correlation, correlation_id, id);
            }
            self.evicted += 1;
        }
    }

    fn collect(&self, ids: Option<&VecDeque<EventId>>, limit: usize) -> Vec<Event> {
        let Some(ids) = ids else {
            return Vec::new();
        };
        let skip = if limit == 0 {
            0
        } else {
            ids.len().saturating_sub(limit)
        };
        ids.iter()
            .skip(skip)
            .filter_map(|id| self.events.get(id))
            .map(|stored| stored.event.clone())
            .collect()
    }
}

fn remove_from_index(index: &mut HashMap<String, VecDeque<EventId>>, key: &str, id: EventId) {
    if let Some(ids) = index.get_mut(key) {
        // Eviction is oldest-first, so the id is almost always at the front.
        if ids.front() == Some(&id) {
            ids.pop_front();
        } else {
            ids.retain(|other| *other != id);
        }
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Thread-safe event store.
pub struct EventStore {
    inner: RwLock<StoreInner>,
    max_events: usize,
    journal: RwLock<Option<Arc<Journal>>>,
}

impl EventStore {
    /// Create a store keeping at most `max_events` events (0 = unbounded).
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            max_events,
            journal: RwLock::new(None),
        }
    }

    /// Mirror every subsequently accepted event and result to `journal`.
    pub fn attach_journal(&self, journal: Arc<Journal>) {
        *self.journal.write() = Some(journal);
    }

    #[must_use]
    pub fn journal(&self) -> Option<Arc<Journal>> {
        self.journal.read().clone()
    }

    /// Record an event.
    ///
    /// # Errors
    ///
    /// `StoreError::DuplicateEvent` if an event with the same id is stored.
    pub fn store_event(&self, event: Event) -> Result<(), StoreError> {
        let entry = self.journal.read().is_some().then(|| JournalEntry::Event {
            event: event.clone(),
        });

        let mut inner = self.inner.write();
        inner.insert(event)?;
        inner.evict_to(self.max_events);
        // Appended under the lock so the journal preserves store order.
        if let Some(entry) = entry {
            self.append_to_journal(entry);
        }
        Ok(())
    }

    /// Record the outcome of one (event, handler) delivery, replacing any
    /// earlier result for the same pair.
    ///
    /// # Errors
    ///
    /// `StoreError::UnknownEvent` if the event is not (or no longer) stored.
    pub fn store_result(&self, result: EventResult) -> Result<(), StoreError> {
        let entry = self.journal.read().is_some().then(|| JournalEntry::Result {
            result: result.clone(),
        });

        let mut inner = self.inner.write();
        inner.record_result(result)?;
        if let Some(entry) = entry {
            self.append_to_journal(entry);
        }
        Ok(())
    }

    fn append_to_journal(&self, entry: JournalEntry) {
        let journal = self.journal.read();
        if let Some(journal) = journal.as_ref() {
            if let Err(e) = journal.append(entry) {
                warn!(path = %journal.path().display(), error = %e, "Journal append failed");
            }
        }
    }

    #[must_use]
    pub fn get_event(&self, id: &EventId) -> Option<Event> {
        self.inner.read().events.get(id).map(|s| s.event.clone())
    }

    /// Most recently recorded result for the event.
    #[must_use]
    pub fn get_result(&self, id: &EventId) -> Option<EventResult> {
        let inner = self.inner.read();
        let stored = inner.events.get(id)?;
        stored.latest.and_then(|i| stored.results.get(i)).cloned()
    }

    /// Every per-handler result for the event, in first-recorded order.
    #[must_use]
    pub fn get_results(&self, id: &EventId) -> Vec<EventResult> {
        self.inner
            .read()
            .events
            .get(id)
            .map(|s| s.results.clone())
            .unwrap_or_default()
    }

    /// Up to `limit` most recent events of `event_type`, oldest first.
    #[must_use]
    pub fn query_by_type(&self, event_type: &str, limit: usize) -> Vec<Event> {
        let inner = self.inner.read();
        inner.collect(inner.by_type.get(event_type), limit)
    }

    #[must_use]
    pub fn query_by_source(&self, source: &str, limit: usize) -> Vec<Event> {
        let inner = self.inner.read();
        inner.collect(inner.by_source.get(source), limit)
    }

    #[must_use]
    pub fn query_by_correlation(&self, correlation_id: &str, limit: usize) -> Vec<Event> {
        let inner = self.inner.read();
        inner.collect(inner.by_correlation.get(correlation_id), limit)
    }

    /// Stored events ascending by timestamp, optionally of one type only.
    /// Events with equal timestamps keep their storage order.
    #[must_use]
    pub fn replay(&self, event_type: Option<&str>) -> Vec<Event> {
        let inner = self.inner.read();
        let mut stored: Vec<&StoredEvent> = match event_type {
            Some(event_type) => inner
                .by_type
                .get(event_type)
                .map(|ids| ids.iter().filter_map(|id| inner.events.get(id)).collect())
                .unwrap_or_default(),
            None => inner
                .order
                .iter()
                .filter_map(|id| inner.events.get(id))
                .collect(),
        };
        stored.sort_by_key(|s| (s.event.timestamp(), s.sequence));
        stored.into_iter().map(|s| s.event.clone()).collect()
    }

    /// Rebuild state from journal entries without writing them back.
    ///
    /// Duplicate events and results for unknown events are skipped.
    /// Returns the number of events restored.
    pub fn restore_from_journal(&self, entries: Vec<JournalEntry>) -> usize {
        let mut inner = self.inner.write();
        let mut restored = 0;
        let mut skipped = 0;

        for entry in entries {
            let outcome = match entry {
                JournalEntry::Event { event } => inner.insert(event).map(|()| restored += 1),
                JournalEntry::Result { result } => inner.record_result(result),
            };
            if outcome.is_err() {
                skipped += 1;
            }
        }
        inner.evict_to(self.max_events);

        debug!(restored, skipped, "Store restored from journal");
        restored
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped by the history bound.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.inner.read().evicted
    }

    #[must_use]
    pub fn journal_errors(&self) -> u64 {
        self.journal.read().as_ref().map_or(0, |j| j.errors())
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(crate::domain::config::StoreConfig::default().max_events)
    }
}
