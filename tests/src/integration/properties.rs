//! # Property Tests
//!
//! Pattern matching, exactly-once delivery per matching subscription and
//! store fidelity over generated inputs.

#[cfg(test)]
mod tests {
    use crate::fixtures::{test_config, Recorder};
    use cortex_bus::{
        Event, EventBus, EventHandler, Pattern, Payload, PublishOptions, SubscribeOptions,
    };
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::sync::Arc;

    /// Strategy for namespaced event types like `cognitive:route`
    fn segment_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex(r"[a-z]{1,8}").unwrap()
    }

    /// Strategy for event types drawn from a small vocabulary, so patterns
    /// actually collide
    fn event_type_strategy() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["case", "user", "job"]),
            prop::sample::select(vec!["created", "closed", "retry"]),
        )
            .prop_map(|(ns, action)| format!("{ns}.{action}"))
    }

    /// Strategy for subscription patterns over the same vocabulary
    fn pattern_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("*".to_string()),
            prop::sample::select(vec!["case.*", "user.*", "job.*", "c*"]).prop_map(String::from),
            event_type_strategy(),
        ]
    }

    /// Strategy for flat JSON payloads
    fn payload_strategy() -> impl Strategy<Value = Payload> {
        prop::collection::btree_map(
            segment_strategy(),
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
                "[ -~]{0,16}".prop_map(Value::from),
            ],
            0..6,
        )
        .prop_map(|map| map.into_iter().collect())
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_prefix_pattern_matches_only_its_namespace(
            ns in segment_strategy(),
            other in segment_strategy(),
            rest in "[a-z:]{0,12}",
        ) {
            let pattern = Pattern::parse(&format!("{ns}:*")).unwrap();
            let inside = format!("{ns}:{rest}");
            prop_assert!(pattern.matches(&inside));

            let outside = format!("{other}:{rest}");
            prop_assert_eq!(pattern.matches(&outside), other == ns);
            prop_assert!(!pattern.matches(&ns));
        }

        #[test]
        fn test_each_matching_subscription_called_once_per_event(
            patterns in prop::collection::vec(pattern_strategy(), 1..6),
            published in prop::collection::vec(event_type_strategy(), 0..12),
        ) {
            let calls = block_on(async {
                let bus = EventBus::new(test_config()).unwrap();
                bus.start().await.unwrap();
                let log = Arc::new(Mutex::new(Vec::new()));
                let recorders: Vec<Arc<Recorder>> = patterns
                    .iter()
                    .enumerate()
                    .map(|(i, _)| Recorder::new(format!("h{i}"), Arc::clone(&log)))
                    .collect();
                for (pattern, recorder) in patterns.iter().zip(&recorders) {
                    let handler: Arc<dyn EventHandler> = recorder.clone();
                    bus.subscribe(pattern, &handler, SubscribeOptions::new()).unwrap();
                }
                for event_type in &published {
                    bus.publish(event_type.as_str(), Value::Null, PublishOptions::new())
                        .await
                        .unwrap();
                }
                bus.stop().await;
                recorders.iter().map(|r| r.calls()).collect::<Vec<_>>()
            });

            for (pattern, got) in patterns.iter().zip(calls) {
                let parsed = Pattern::parse(pattern).unwrap();
                let expected = published.iter().filter(|t| parsed.matches(t)).count() as u64;
                prop_assert_eq!(got, expected, "pattern {}", pattern);
            }
        }

        #[test]
        fn test_stored_event_equals_published(
            event_type in event_type_strategy(),
            source in segment_strategy(),
            data in payload_strategy(),
        ) {
            let event = Event::new(event_type, data).with_source(source);
            let stored = block_on(async {
                let bus = EventBus::new(test_config()).unwrap();
                bus.start().await.unwrap();
                bus.publish_event(event.clone()).await.unwrap();
                bus.get_event(&event.id())
            });
            prop_assert_eq!(stored, Some(event));
        }
    }
}
