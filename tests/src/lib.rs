//! # Cortex Test Suite
//!
//! Cross-module scenarios exercising the event bus end to end.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── integration/
//! │   ├── dispatch.rs       # priority order, isolation, concurrency
//! │   ├── subscriptions.rs  # once, unsubscribe, weak pruning, guards
//! │   ├── lifecycle.rs      # start/stop, timeouts, stats after stop
//! │   ├── persistence.rs    # journal, restore, replay, redelivery
//! │   ├── broker.rs         # bridge degradation and cross-bus delivery
//! │   └── properties.rs     # proptest properties
//! └── benches/              # criterion throughput benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p cortex-tests
//! cargo test -p cortex-tests integration::broker::
//! cargo bench -p cortex-tests
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod fixtures;
pub mod integration;
