//! Process-wide bus accessor.
//!
//! Prefer constructing an [`EventBus`] and passing it to collaborators.
//! This exists for call sites that cannot be threaded through, and is
//! initialized at most once per process.

use crate::bus::EventBus;
use crate::domain::config::BusConfig;
use crate::error::BusError;
use parking_lot::{const_mutex, Mutex};
use std::sync::OnceLock;
use tracing::warn;

static BUS: OnceLock<EventBus> = OnceLock::new();
static INIT: Mutex<()> = const_mutex(());

/// Build the process-wide bus from `config`.
///
/// The bus is not started. Later calls return the already-initialized bus
/// and ignore their `config`.
///
/// # Errors
///
/// `BusError::Config` if the first `config` is invalid; nothing is stored
/// and a later call may retry.
pub fn init(config: BusConfig) -> Result<&'static EventBus, BusError> {
    let _init = INIT.lock();
    if let Some(bus) = BUS.get() {
        warn!("Global event bus already initialized, ignoring new configuration");
        return Ok(bus);
    }
    let bus = EventBus::new(config)?;
    Ok(BUS.get_or_init(|| bus))
}

/// The process-wide bus, if [`init`] has succeeded.
#[must_use]
pub fn bus() -> Option<&'static EventBus> {
    BUS.get()
}
