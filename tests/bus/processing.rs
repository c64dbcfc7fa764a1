//! Polling and push processors over the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use conveyor::prelude::*;
use conveyor::{callback, InMemoryQueue, PollingOptions, ProcessorStats};

use crate::support::{entries, trace, Marker, MyEvent, OrderCreated, OrderHandler, RecordingHandler};

fn connection(queue: &InMemoryQueue) -> Arc<Connection<InMemoryQueue>> {
    Arc::new(Connection::new(queue.clone()).with_application_id("processing-tests"))
}

fn polling(
    queue: &InMemoryQueue,
    name: &str,
    processor: MessageProcessor,
) -> PollingProcessor<InMemoryQueue> {
    PollingProcessor::new(connection(queue), name, processor).with_options(
        PollingOptions::default().with_poll_interval(Duration::from_millis(10)),
    )
}

/// Run a polling processor long enough to drain what was published.
async fn drain(processor: PollingProcessor<InMemoryQueue>) -> ProcessorStats {
    let source = CancellationSource::new();
    let handle = processor.spawn(source.token());
    tokio::time::sleep(Duration::from_millis(150)).await;
    source.cancel();
    handle.await.unwrap().unwrap()
}

#[tokio::test]
async fn published_event_is_dispatched_exactly_once() {
    let queue = InMemoryQueue::new();
    let seen = trace();

    Publisher::new(connection(&queue))
        .publish(&MyEvent { name: "Jack!".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let s = seen.clone();
    let processor = MessageProcessor::builder()
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: s.clone() })
        .build()
        .unwrap();
    let stats = drain(polling(&queue, "q1", processor)).await;

    assert_eq!(entries(&seen), vec!["Jack!"]);
    assert_eq!(stats.handled, 1);
    assert_eq!(queue.completed().len(), 1);
}

#[tokio::test]
async fn handler_failure_does_not_stop_the_loop() {
    let queue = InMemoryQueue::new();
    let seen = trace();
    let errors = Arc::new(Mutex::new(Vec::new()));

    let publisher = Publisher::new(connection(&queue));
    for name in ["first", "fail-second", "third"] {
        publisher
            .publish(&MyEvent { name: name.into() }, "q1", &CancellationToken::none())
            .await
            .unwrap();
    }

    let (s, e) = (seen.clone(), errors.clone());
    let processor = MessageProcessor::builder()
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: s.clone() })
        .on_error(Arc::new(move |err: &BusError, _delivery: &conveyor::Delivery| {
            e.lock().unwrap().push(err.clone());
        }))
        .build()
        .unwrap();
    let stats = drain(polling(&queue, "q1", processor)).await;

    assert_eq!(entries(&seen), vec!["first", "third"]);
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.failed, 1);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], BusError::Handler(_)));
}

#[tokio::test]
async fn middleware_wraps_handler_in_registration_order() {
    let queue = InMemoryQueue::new();
    let log = trace();

    Publisher::new(connection(&queue))
        .publish(&MyEvent { name: "handler".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let l = log.clone();
    let processor = MessageProcessor::builder()
        .middleware(Marker { name: "A", trace: log.clone() })
        .middleware(Marker { name: "B", trace: log.clone() })
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: l.clone() })
        .build()
        .unwrap();
    drain(polling(&queue, "q1", processor)).await;

    assert_eq!(
        entries(&log),
        vec!["before-A", "before-B", "handler", "after-B", "after-A"]
    );
}

#[tokio::test]
async fn unknown_type_is_counted_as_unprocessable() {
    let queue = InMemoryQueue::new();
    let seen = trace();

    // Published under a name the consumer never registered.
    Publisher::new(connection(&queue))
        .publish(
            &OrderCreated {
                order_id: "o-1".into(),
                note: None,
            },
            "q1",
            &CancellationToken::none(),
        )
        .await
        .unwrap();

    let s = seen.clone();
    let processor = MessageProcessor::builder()
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: s.clone() })
        .build()
        .unwrap();
    let stats = drain(polling(&queue, "q1", processor)).await;

    assert!(entries(&seen).is_empty());
    assert_eq!(stats.unprocessable, 1);
    assert_eq!(queue.rejected().len(), 1);
}

#[tokio::test]
async fn fallback_callback_receives_unhandled_types() {
    let queue = InMemoryQueue::new();
    let seen = trace();

    Publisher::new(connection(&queue))
        .publish(&MyEvent { name: "via-callback".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let s = seen.clone();
    let processor = MessageProcessor::builder()
        .register::<MyEvent>()
        .on_process(callback(move |message, args| {
            let s = s.clone();
            async move {
                let Some(event) = message.downcast_ref::<MyEvent>() else {
                    return Err(BusError::handler("unexpected type"));
                };
                s.lock()
                    .unwrap()
                    .push(format!("{}:{}", args.queue, event.name));
                Ok(())
            }
        }))
        .build()
        .unwrap();
    drain(polling(&queue, "q1", processor)).await;

    assert_eq!(entries(&seen), vec!["q1:via-callback"]);
}

#[tokio::test]
async fn push_processor_with_correlation() {
    let queue = InMemoryQueue::new();
    let seen = trace();
    let connection = connection(&queue);

    let s = seen.clone();
    let processor = MessageProcessor::builder()
        .middleware(CorrelationMiddleware)
        .handle::<OrderCreated, _, _>(move || OrderHandler { trace: s.clone() })
        .build()
        .unwrap();
    let push = PushProcessor::new(connection.clone(), "orders", processor);
    let source = CancellationSource::new();
    let handle = push.spawn(source.token());

    let publisher = Publisher::new(connection);
    publisher
        .publish_with(
            &OrderCreated {
                order_id: "o-1".into(),
                note: Some("gift".into()),
            },
            "orders",
            conveyor::PublishOptions::default().with_header("correlation-id", "chain-1"),
            &CancellationToken::none(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    source.cancel();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(entries(&seen), vec!["o-1@chain-1"]);
    assert_eq!(stats.handled, 1);
    assert_eq!(queue.connect_count(), 1);
}

#[tokio::test]
async fn duplicate_handlers_fail_at_startup() {
    let seen = trace();
    let (a, b) = (seen.clone(), seen);
    let result = MessageProcessor::builder()
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: a.clone() })
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: b.clone() })
        .build();

    assert!(matches!(result, Err(BusError::Configuration(_))));
}
