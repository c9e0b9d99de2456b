//! # Lifecycle Scenarios
//!
//! Start/stop semantics, handler timeouts and shutdown draining.

#[cfg(test)]
mod tests {
    use crate::fixtures::{running_bus, test_config};
    use cortex_bus::{
        BusError, BusState, EventBus, EventStatus, HandlerContext, PublishOptions,
        SubscribeOptions,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_before_start_fails_fast() {
        let bus = EventBus::new(test_config()).unwrap();
        assert_eq!(bus.state(), BusState::Created);

        let err = bus
            .publish("case.created", json!({}), PublishOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotStarted));
        assert!(err.to_string().contains("not started"));
    }

    #[tokio::test]
    async fn test_no_deliveries_after_stop_and_stats_consistent() {
        let bus = running_bus(test_config()).await.unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        bus.subscribe_fn(
            "*",
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

        let mut ids = Vec::new();
        for n in 0..5 {
            let delivery = bus
                .publish("metric.sample", json!({ "n": n }), PublishOptions::new())
                .await
                .unwrap();
            ids.push(delivery.event_id);
        }
        bus.stop().await;

        assert!(matches!(
            bus.publish("metric.sample", Value::Null, PublishOptions::new())
                .await,
            Err(BusError::Stopped)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let stats = bus.stats();
        assert!(!stats.running);
        assert_eq!(stats.state, BusState::Stopped);
        assert_eq!(stats.events_published, 5);
        assert_eq!(stats.handler_invocations, 5);
        assert_eq!(stats.handler_successes, 5);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);

        // Store stays queryable for post-mortem inspection.
        for id in &ids {
            assert!(bus.get_event(id).is_some());
            assert_eq!(bus.get_result(id).unwrap().status, EventStatus::Completed);
        }
        assert_eq!(bus.replay(Some("metric.sample")).len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_is_cooperative_and_respects_retry_budget() {
        let bus = running_bus(test_config()).await.unwrap();
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed_cancel);
        bus.subscribe_fn(
            "report.render",
            move |_e, ctx: HandlerContext| {
                let flag = Arc::clone(&flag);
                async move {
                    let mut signal = ctx.cancel_signal();
                    tokio::select! {
                        _ = signal.cancelled() => {
                            flag.store(true, Ordering::SeqCst);
                            Err(cortex_bus::HandlerError::Cancelled)
                        }
                        _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(None),
                    }
                }
            },
            SubscribeOptions::new().with_name("slow-render"),
        )
        .unwrap();

        let retryable = bus
            .publish(
                "report.render",
                Value::Null,
                PublishOptions::new()
                    .with_timeout(Duration::from_millis(30))
                    .with_max_retries(2),
            )
            .await
            .unwrap();
        assert_eq!(retryable.results[0].status, EventStatus::Retry);
        assert!(retryable.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));

        let exhausted = bus
            .publish(
                "report.render",
                Value::Null,
                PublishOptions::new()
                    .with_timeout(Duration::from_millis(30))
                    .with_max_retries(0),
            )
            .await
            .unwrap();
        assert_eq!(exhausted.results[0].status, EventStatus::Failed);

        assert!(
            crate::fixtures::eventually(Duration::from_secs(1), || observed_cancel
                .load(Ordering::SeqCst))
            .await
        );
        assert_eq!(bus.stats().handler_retries, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_drains_in_flight_then_rejects() {
        let bus = running_bus(test_config()).await.unwrap();
        bus.subscribe_fn(
            "batch.*",
            |_e, _c| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Some(json!("done")))
            },
            SubscribeOptions::new(),
        )
        .unwrap();

        let publisher = bus.clone();
        let in_flight = tokio::spawn(async move {
            publisher
                .publish("batch.close", Value::Null, PublishOptions::new())
                .await
        });
        assert!(
            crate::fixtures::eventually(Duration::from_secs(1), || bus.stats().stored_events == 1)
                .await
        );

        let stopper = bus.clone();
        let stopping = tokio::spawn(async move { stopper.stop().await });
        assert!(
            crate::fixtures::eventually(Duration::from_secs(1), || bus.state() != BusState::Running)
                .await
        );
        let late = bus
            .publish("batch.late", Value::Null, PublishOptions::new())
            .await;
        assert!(matches!(
            late,
            Err(BusError::ShuttingDown) | Err(BusError::Stopped)
        ));

        let delivery = in_flight.await.unwrap().unwrap();
        stopping.await.unwrap();
        assert_eq!(delivery.results[0].status, EventStatus::Completed);
        assert_eq!(bus.state(), BusState::Stopped);
        assert_eq!(bus.stats().handler_successes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_publish_still_records_results_and_blocks_stop() {
        let bus = running_bus(test_config()).await.unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        bus.subscribe_fn(
            "export.slow",
            move |_e, _c| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(None)
                }
            },
            SubscribeOptions::new().with_name("slow-export"),
        )
        .unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            bus.publish("export.slow", Value::Null, PublishOptions::new()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(bus.stats().stored_events, 1);

        bus.stop().await;
        assert!(finished.load(Ordering::SeqCst));

        let event = bus.query_by_type("export.slow", 0).pop().unwrap();
        let results = bus.get_results(&event.id());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, EventStatus::Completed);
        assert_eq!(results[0].handler, "slow-export");
        let stats = bus.stats();
        assert_eq!(stats.handler_invocations, 1);
        assert_eq!(stats.handler_successes, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_at_build() {
        let mut config = test_config();
        config.broker.outbound_queue_capacity = 0;
        assert!(matches!(EventBus::new(config), Err(BusError::Config(_))));
    }
}
