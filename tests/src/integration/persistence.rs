//! # Persistence Scenarios
//!
//! Journal write-through, restore into a fresh bus, replay order and
//! redelivery.

#[cfg(test)]
mod tests {
    use crate::fixtures::{running_bus, test_config};
    use cortex_bus::{
        bus::REPLAYED_KEY, Event, EventStatus, Payload, PublishOptions, SubscribeOptions,
        TypeGuard,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_journal_restores_into_fresh_bus() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal").join("events.jsonl");

        let mut config = test_config();
        config.store.journal_path = Some(path.clone());
        let bus = running_bus(config).await.unwrap();
        bus.add_middleware(Arc::new(TypeGuard::new().deny("debug.*").unwrap()));
        bus.subscribe_fn(
            "case.*",
            |_e, _c| async { Ok(Some(json!({"ok": true}))) },
            SubscribeOptions::new(),
        )
        .unwrap();

        let created = bus
            .publish(
                "case.created",
                json!({"id": "c1"}),
                PublishOptions::new().with_correlation_id("case-c1"),
            )
            .await
            .unwrap();
        let closed = bus
            .publish(
                "case.closed",
                json!({"id": "c1"}),
                PublishOptions::new().with_correlation_id("case-c1"),
            )
            .await
            .unwrap();
        assert!(bus
            .publish("debug.dump", Value::Null, PublishOptions::new())
            .await
            .is_err());
        bus.stop().await;
        assert_eq!(bus.stats().journal_errors, 0);

        let restored = running_bus(test_config()).await.unwrap();
        assert_eq!(restored.restore_journal(&path).unwrap(), 3);

        assert_eq!(restored.get_event(&created.event_id), bus.get_event(&created.event_id));
        assert_eq!(
            restored.get_result(&closed.event_id).unwrap().result,
            Some(json!({"ok": true}))
        );
        assert_eq!(restored.query_by_correlation("case-c1", 0).len(), 2);

        let rejected = restored.query_by_type("debug.dump", 0);
        assert_eq!(rejected.len(), 1);
        let rejection = restored.get_result(&rejected[0].id()).unwrap();
        assert_eq!(rejection.status, EventStatus::Failed);
        assert!(rejection.handler.starts_with("middleware:"));
    }

    #[tokio::test]
    async fn test_unwritable_journal_fails_start() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut config = test_config();
        config.store.journal_path = Some(blocker.join("events.jsonl"));
        let bus = cortex_bus::EventBus::new(config).unwrap();
        assert!(matches!(bus.start().await, Err(cortex_bus::BusError::Store(_))));
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn test_replay_is_ascending_by_timestamp() {
        let bus = running_bus(test_config()).await.unwrap();
        let first = Event::new("audit.entry", Payload::new());
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = Event::new("audit.entry", Payload::new());

        // Published newest first.
        bus.publish_event(second.clone()).await.unwrap();
        bus.publish_event(first.clone()).await.unwrap();
        bus.publish("other", Value::Null, PublishOptions::new())
            .await
            .unwrap();

        let replayed = bus.replay(Some("audit.entry"));
        assert_eq!(replayed, vec![first.clone(), second.clone()]);
        assert!(second.timestamp() > first.timestamp());
        assert_eq!(bus.replay(None).len(), 3);
    }

    #[tokio::test]
    async fn test_redeliver_runs_current_handlers() {
        let bus = running_bus(test_config()).await.unwrap();
        bus.publish("invoice.issued", json!({"n": 1}), PublishOptions::new())
            .await
            .unwrap();
        bus.publish("invoice.issued", json!({"n": 2}), PublishOptions::new())
            .await
            .unwrap();

        // Subscribed after the fact, like a recovering consumer.
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_fn(
            "invoice.*",
            move |event: Arc<Event>, _c| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push((
                        event.data().get("n").cloned(),
                        event.metadata().get(REPLAYED_KEY).cloned(),
                    ));
                    Ok(None)
                }
            },
            SubscribeOptions::new(),
        )
        .unwrap();

        let deliveries = bus.redeliver(Some("invoice.issued")).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries.iter().all(|d| d.all_succeeded()));
        assert_eq!(
            *seen.lock(),
            vec![
                (Some(json!(1)), Some(Value::Bool(true))),
                (Some(json!(2)), Some(Value::Bool(true))),
            ]
        );

        // Stored copies are untouched; results now reflect the redelivery.
        let stored = bus.replay(Some("invoice.issued"));
        assert!(stored.iter().all(|e| e.metadata().get(REPLAYED_KEY).is_none()));
        assert_eq!(bus.get_results(&deliveries[0].event_id).len(), 1);
        assert_eq!(bus.stats().events_published, 2);
    }
}
