//! Shared fixtures for integration scenarios and benchmarks.

use async_trait::async_trait;
use cortex_bus::{
    BusConfig, BusError, DispatchMode, Event, EventBus, EventHandler, HandlerContext,
    HandlerOutcome,
};
use parking_lot::Mutex;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config without the background prune sweep.
pub fn test_config() -> BusConfig {
    let mut config = BusConfig::default();
    config.lifecycle.prune_interval_ms = 0;
    config.lifecycle.shutdown_timeout_ms = 1_000;
    config
}

/// Same, with handlers run one after another.
pub fn sequential_config() -> BusConfig {
    let mut config = test_config();
    config.dispatch.mode = DispatchMode::Sequential;
    config
}

/// A started bus.
pub async fn running_bus(config: BusConfig) -> Result<EventBus, BusError> {
    let bus = EventBus::new(config)?;
    bus.start().await?;
    Ok(bus)
}

/// Handler that logs `(label, event type)` into a shared journal and
/// counts its calls.
pub struct Recorder {
    label: String,
    log: Arc<Mutex<Vec<(String, String)>>>,
    calls: AtomicU64,
}

impl Recorder {
    pub fn new(label: impl Into<String>, log: Arc<Mutex<Vec<(String, String)>>>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            log,
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: Arc<Event>, _ctx: HandlerContext) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .push((self.label.clone(), event.event_type().to_string()));
        Ok(Some(json!({ "handled_by": self.label })))
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Run `make` on `producers` tasks, `per_producer` times each.
pub async fn fan_in<F, Fut>(producers: usize, per_producer: usize, make: F)
where
    F: Fn(usize, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let make = Arc::new(make);
    let tasks = (0..producers).map(|producer| {
        let make = Arc::clone(&make);
        tokio::spawn(async move {
            for seq in 0..per_producer {
                make(producer, seq).await;
            }
        })
    });
    for joined in futures::future::join_all(tasks).await {
        if let Err(e) = joined {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
}
