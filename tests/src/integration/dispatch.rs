//! # Dispatch Scenarios
//!
//! Priority ordering, failure isolation and concurrent producers.

#[cfg(test)]
mod tests {
    use crate::fixtures::{fan_in, running_bus, sequential_config, test_config, Recorder};
    use cortex_bus::{
        Event, EventHandler, EventStatus, HandlerError, Payload, Priority, PublishOptions,
        SubscribeOptions,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    // =========================================================================
    // PRIORITY ORDER
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_case_created_high_before_normal() {
        let bus = running_bus(test_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let wildcard: Arc<dyn EventHandler> = Recorder::new("case-wildcard", Arc::clone(&log));
        let exact: Arc<dyn EventHandler> = Recorder::new("case-created", Arc::clone(&log));

        // Registered NORMAL first so order comes from priority, not registration.
        bus.subscribe("case.created", &exact, SubscribeOptions::new())
            .unwrap();
        bus.subscribe(
            "case.*",
            &wildcard,
            SubscribeOptions::new().with_priority(Priority::High),
        )
        .unwrap();

        let delivery = bus
            .publish("case.created", json!({"id": "c1"}), PublishOptions::new())
            .await
            .unwrap();

        let handlers: Vec<&str> = delivery.results.iter().map(|r| r.handler.as_str()).collect();
        assert_eq!(handlers, vec!["case-wildcard", "case-created"]);
        assert!(delivery
            .results
            .iter()
            .all(|r| r.status == EventStatus::Completed));
        assert_eq!(bus.get_results(&delivery.event_id).len(), 2);
    }

    #[tokio::test]
    async fn test_sequential_mode_invokes_in_priority_order() {
        let bus = running_bus(sequential_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Recorder::new("low", Arc::clone(&log)),
            Recorder::new("normal-1", Arc::clone(&log)),
            Recorder::new("critical", Arc::clone(&log)),
            Recorder::new("normal-2", Arc::clone(&log)),
        ];
        let priorities = [Priority::Low, Priority::Normal, Priority::Critical, Priority::Normal];
        for (handler, priority) in handlers.iter().zip(priorities) {
            bus.subscribe("*", handler, SubscribeOptions::new().with_priority(priority))
                .unwrap();
        }

        bus.publish("job.run", json!({}), PublishOptions::new())
            .await
            .unwrap();

        let order: Vec<String> = log.lock().iter().map(|(label, _)| label.clone()).collect();
        assert_eq!(order, vec!["critical", "normal-1", "normal-2", "low"]);
    }

    // =========================================================================
    // FAILURE ISOLATION
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = running_bus(test_config()).await.unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let healthy: Arc<dyn EventHandler> = Recorder::new("healthy", Arc::clone(&log));

        bus.subscribe_fn(
            "order.*",
            |_e, _c| async { Err(HandlerError::failed("inventory offline")) },
            SubscribeOptions::new()
                .with_priority(Priority::Critical)
                .with_name("always-errors"),
        )
        .unwrap();
        bus.subscribe_fn(
            "order.*",
            |event: Arc<Event>, _c| async move {
                if event.event_type() == "order.placed" {
                    panic!("unexpected order");
                }
                Ok(None)
            },
            SubscribeOptions::new()
                .with_priority(Priority::High)
                .with_name("panics"),
        )
        .unwrap();
        bus.subscribe("order.placed", &healthy, SubscribeOptions::new())
            .unwrap();

        let delivery = bus
            .publish("order.placed", json!({"sku": "A-1"}), PublishOptions::new())
            .await
            .expect("handler failures never reach the publisher");

        let statuses: Vec<(String, EventStatus)> = delivery
            .results
            .iter()
            .map(|r| (r.handler.clone(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("always-errors".to_string(), EventStatus::Failed),
                ("panics".to_string(), EventStatus::Failed),
                ("healthy".to_string(), EventStatus::Completed),
            ]
        );
        assert!(delivery.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("unexpected order"));
        assert_eq!(log.lock().len(), 1);

        let stats = bus.stats();
        assert_eq!(stats.handler_failures, 2);
        assert_eq!(stats.handler_successes, 1);
    }

    // =========================================================================
    // CONCURRENT PRODUCERS
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_thousand_events_from_ten_producers() {
        let bus = running_bus(test_config()).await.unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe_fn(
            "load.*",
            move |_e, _c| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            },
            SubscribeOptions::new(),
        )
        .unwrap();

        let ids = Arc::new(Mutex::new(Vec::new()));
        let publisher = bus.clone();
        let collected = Arc::clone(&ids);
        fan_in(10, 100, move |producer, seq| {
            let bus = publisher.clone();
            let ids = Arc::clone(&collected);
            async move {
                let delivery = bus
                    .publish(
                        "load.tick",
                        json!({ "producer": producer, "seq": seq }),
                        PublishOptions::new().with_source(format!("producer-{producer}")),
                    )
                    .await
                    .unwrap();
                ids.lock().push(delivery.event_id);
            }
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1000);
        let unique: HashSet<_> = ids.lock().iter().copied().collect();
        assert_eq!(unique.len(), 1000);
        assert_eq!(bus.stats().stored_events, 1000);
        assert_eq!(bus.query_by_type("load.tick", 0).len(), 1000);
        assert_eq!(bus.query_by_source("producer-3", 0).len(), 100);
    }

    #[tokio::test]
    async fn test_prometheus_recorder_agrees_with_stats() {
        let recorder = Arc::new(cortex_telemetry::PrometheusRecorder::new().unwrap());
        let bus = cortex_bus::EventBus::builder()
            .with_config(test_config())
            .with_metrics_recorder(recorder.clone())
            .build()
            .unwrap();
        bus.start().await.unwrap();
        bus.add_middleware(Arc::new(
            cortex_bus::TypeGuard::new().deny("internal.*").unwrap(),
        ));
        bus.subscribe_fn(
            "task.*",
            |event: Arc<Event>, _c| async move {
                if event.data().contains_key("fail") {
                    Err(HandlerError::failed("requested"))
                } else {
                    Ok(None)
                }
            },
            SubscribeOptions::new().with_name("worker"),
        )
        .unwrap();

        bus.publish("task.run", json!({}), PublishOptions::new())
            .await
            .unwrap();
        bus.publish("task.run", json!({"fail": true}), PublishOptions::new())
            .await
            .unwrap();
        assert!(bus
            .publish("internal.trace", json!({}), PublishOptions::new())
            .await
            .is_err());

        let stats = bus.stats();
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.events_rejected, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);

        let text = recorder.encode().unwrap();
        assert!(text.contains(
            "cortex_bus_handler_calls_total{event_type=\"task.run\",status=\"completed\"} 1"
        ));
        assert!(text.contains(
            "cortex_bus_handler_calls_total{event_type=\"task.run\",status=\"failed\"} 1"
        ));
        assert!(text.contains("cortex_bus_events_rejected_total{event_type=\"internal.trace\""));
    }

    #[tokio::test]
    async fn test_prebuilt_event_is_stored_unchanged() {
        let bus = running_bus(test_config()).await.unwrap();
        let mut data = Payload::new();
        data.insert("id".to_string(), json!("c1"));
        let cause = Event::new("case.opened", Payload::new());
        let event = Event::new("case.created", data)
            .with_source("intake")
            .with_priority(Priority::High)
            .with_correlation_id("flow-7")
            .caused_by(&cause);

        let delivery = bus.publish_event(event.clone()).await.unwrap();

        assert_eq!(delivery.event_id, event.id());
        assert_eq!(bus.get_event(&event.id()), Some(event));
        assert_eq!(bus.query_by_correlation("flow-7", 0).len(), 1);
    }
}
