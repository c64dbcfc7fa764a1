//! Publisher retry, ids and cancellation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use conveyor::prelude::*;
use conveyor::{BusEvent, Diagnostics, InMemoryQueue, PublishOptions, RetryPolicy};

use crate::support::MyEvent;

#[derive(Debug, Serialize, Deserialize, Message)]
struct Bare(u32);

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(attempts)
        .with_base_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
}

fn publisher(queue: &InMemoryQueue) -> Publisher<InMemoryQueue> {
    Publisher::new(Arc::new(
        Connection::new(queue.clone()).with_application_id("publisher-tests"),
    ))
}

#[tokio::test]
async fn publish_writes_envelope_and_producer() {
    let queue = InMemoryQueue::new();
    let id = publisher(&queue)
        .publish(&MyEvent { name: "Jack!".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let sent = queue.sent_to("q1");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, id);
    assert_eq!(sent[0].type_name, "bus::support::MyEvent");
    assert_eq!(
        sent[0].body,
        r#"{"$type":"bus::support::MyEvent","name":"Jack!"}"#
    );
    assert_eq!(sent[0].producer.as_deref(), Some("publisher-tests"));
}

/// Keeps the id of every failed publish attempt.
#[derive(Default)]
struct FailedAttempts {
    ids: Mutex<Vec<String>>,
}

impl Diagnostics for FailedAttempts {
    fn event(&self, event: &BusEvent<'_>) {
        if let BusEvent::PublishFailed { message_id, .. } = event {
            self.ids.lock().unwrap().push(message_id.to_string());
        }
    }
}

#[tokio::test]
async fn transient_failures_are_retried_with_fresh_ids() {
    let queue = InMemoryQueue::new();
    queue.fail_next_sends(2);
    let failed = Arc::new(FailedAttempts::default());

    let id = publisher(&queue)
        .with_retry(fast_retry(3))
        .with_diagnostics(failed.clone())
        .publish(&MyEvent { name: "retry".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let sent = queue.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, id);

    let failed_ids = failed.ids.lock().unwrap().clone();
    assert_eq!(failed_ids.len(), 2);
    assert_ne!(failed_ids[0], failed_ids[1]);
    assert!(!failed_ids.contains(&id));
}

#[tokio::test]
async fn caller_supplied_id_survives_retries() {
    let queue = InMemoryQueue::new();
    queue.fail_next_sends(1);
    let failed = Arc::new(FailedAttempts::default());

    let options = PublishOptions::default()
        .with_message_id("order-42")
        .with_header("correlation-id", "chain-7");
    let id = publisher(&queue)
        .with_retry(fast_retry(2))
        .with_diagnostics(failed.clone())
        .publish_with(&MyEvent { name: "x".into() }, "q1", options, &CancellationToken::none())
        .await
        .unwrap();

    assert_eq!(id, "order-42");
    assert_eq!(*failed.ids.lock().unwrap(), vec!["order-42"]);
    let sent = queue.sent();
    assert_eq!(sent[0].id, "order-42");
    assert_eq!(sent[0].headers.get_str("correlation-id"), Some("chain-7"));
}

#[tokio::test]
async fn retries_are_bounded() {
    let queue = InMemoryQueue::new();
    queue.fail_next_sends(10);

    let err = publisher(&queue)
        .with_retry(fast_retry(3))
        .publish(&MyEvent { name: "never".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(queue.is_empty());
    assert_eq!(queue.connect_count(), 1);
}

#[tokio::test]
async fn serialization_errors_are_not_retried() {
    let queue = InMemoryQueue::new();
    queue.fail_next_sends(1);

    let err = publisher(&queue)
        .with_retry(fast_retry(5))
        .publish(&Bare(5), "q1", &CancellationToken::none())
        .await
        .unwrap_err();

    assert!(matches!(err, BusError::Serialization(_)));
    // The transport was never reached, so the injected failure is unused.
    assert_eq!(queue.connect_count(), 0);
}

#[tokio::test]
async fn unreachable_transport_is_a_connection_error() {
    let queue = InMemoryQueue::new();
    queue.set_unreachable(true);

    let err = publisher(&queue)
        .with_retry(fast_retry(2))
        .publish(&MyEvent { name: "x".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Connection(_)));
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let queue = InMemoryQueue::new();
    queue.fail_next_sends(10);

    let source = CancellationSource::new();
    let token = source.token();
    let publisher = publisher(&queue).with_retry(
        RetryPolicy::default()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_secs(5)),
    );

    let started = Instant::now();
    let task = tokio::spawn(async move {
        publisher
            .publish(&MyEvent { name: "slow".into() }, "q1", &token)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    source.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, BusError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn batch_publishes_in_order() {
    let queue = InMemoryQueue::new();
    let events = vec![
        MyEvent { name: "a".into() },
        MyEvent { name: "b".into() },
    ];
    let ids = publisher(&queue)
        .publish_batch(&events, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let sent: Vec<_> = queue.sent().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, sent);
}

#[tokio::test]
async fn concurrent_publishers_share_one_client() {
    let queue = InMemoryQueue::new();
    let publisher = Arc::new(publisher(&queue));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let publisher = publisher.clone();
            tokio::spawn(async move {
                publisher
                    .publish(&MyEvent { name: format!("n{}", i) }, "q1", &CancellationToken::none())
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(queue.len(), 8);
    assert_eq!(queue.connect_count(), 1);
}
