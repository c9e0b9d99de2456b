//! # Subscription Scenarios
//!
//! `once` delivery, idempotent unsubscribe, weak-reference pruning and
//! drop guards.

#[cfg(test)]
mod tests {
    use crate::fixtures::{fan_in, running_bus, test_config, Recorder};
    use cortex_bus::{EventHandler, PublishOptions, SubscribeOptions};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_once_fires_at_most_once_under_concurrency() {
        let bus = running_bus(test_config()).await.unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe_fn(
            "session.started",
            move |_e, _c| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            },
            SubscribeOptions::new().with_once(),
        )
        .unwrap();

        let publisher = bus.clone();
        fan_in(8, 25, move |_, _| {
            let bus = publisher.clone();
            async move {
                bus.publish("session.started", Value::Null, PublishOptions::new())
                    .await
                    .unwrap();
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().active_subscriptions, 0);
        assert_eq!(bus.stats().events_published, 200);
    }

    #[tokio::test]
    async fn test_once_removed_even_when_handler_fails() {
        let bus = running_bus(test_config()).await.unwrap();
        let handle = bus
            .subscribe_fn(
                "a",
                |_e, _c| async { Err(cortex_bus::HandlerError::failed("boom")) },
                SubscribeOptions::new().with_once(),
            )
            .unwrap();

        let first = bus.publish("a", Value::Null, PublishOptions::new()).await.unwrap();
        let second = bus.publish("a", Value::Null, PublishOptions::new()).await.unwrap();

        assert_eq!(first.results.len(), 1);
        assert!(second.results.is_empty());
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_unsubscribe_twice_is_a_noop() {
        let bus = running_bus(test_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn EventHandler> = Recorder::new("audit", Arc::clone(&log));
        let handle = bus.subscribe("*", &handler, SubscribeOptions::new()).unwrap();

        bus.publish("x", Value::Null, PublishOptions::new()).await.unwrap();
        assert!(bus.unsubscribe(&handle));
        assert!(!bus.unsubscribe(&handle));
        assert!(!handle.unsubscribe());
        bus.publish("x", Value::Null, PublishOptions::new()).await.unwrap();

        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_owner_is_pruned_on_dispatch() {
        let bus = running_bus(test_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let kept: Arc<dyn EventHandler> = Recorder::new("kept", Arc::clone(&log));
        let forgotten: Arc<dyn EventHandler> = Recorder::new("forgotten", Arc::clone(&log));
        bus.subscribe("user.*", &kept, SubscribeOptions::new()).unwrap();
        let handle = bus
            .subscribe("user.*", &forgotten, SubscribeOptions::new())
            .unwrap();
        assert_eq!(bus.stats().active_subscriptions, 2);

        drop(forgotten);
        let delivery = bus
            .publish("user.login", json!({"user": "u1"}), PublishOptions::new())
            .await
            .unwrap();

        assert_eq!(delivery.results.len(), 1);
        assert_eq!(delivery.results[0].handler, "kept");
        assert!(!handle.is_active());
        let stats = bus.stats();
        assert_eq!(stats.active_subscriptions, 1);
        assert_eq!(stats.pruned_subscriptions, 1);
    }

    #[tokio::test]
    async fn test_retained_handler_outlives_caller_reference() {
        let bus = running_bus(test_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn EventHandler> = Recorder::new("retained", Arc::clone(&log));
        bus.subscribe("*", &handler, SubscribeOptions::new().retain())
            .unwrap();
        drop(handler);

        bus.publish("x", Value::Null, PublishOptions::new()).await.unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_unsubscribes_on_drop() {
        let bus = running_bus(test_config()).await.unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let guard = bus
            .subscribe_fn(
                "tick",
                move |_e, _c| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                },
                SubscribeOptions::new(),
            )
            .unwrap()
            .into_guard();

        bus.publish("tick", Value::Null, PublishOptions::new()).await.unwrap();
        drop(guard);
        bus.publish("tick", Value::Null, PublishOptions::new()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_wildcard_scope() {
        let bus = running_bus(test_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let cognitive: Arc<dyn EventHandler> = Recorder::new("cognitive", Arc::clone(&log));
        bus.subscribe("cognitive:*", &cognitive, SubscribeOptions::new())
            .unwrap();

        for event_type in ["cognitive:route", "cognitive:mode:switch", "cognition:route"] {
            bus.publish(event_type, Value::Null, PublishOptions::new())
                .await
                .unwrap();
        }

        let seen: Vec<String> = log.lock().iter().map(|(_, ty)| ty.clone()).collect();
        assert_eq!(seen, vec!["cognitive:route", "cognitive:mode:switch"]);
    }
}
