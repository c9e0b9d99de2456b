//! Event storage: in-memory indices plus an optional append-only journal.

pub mod journal;
pub mod memory;

pub use journal::{Journal, JournalEntry};
pub use memory::EventStore;
