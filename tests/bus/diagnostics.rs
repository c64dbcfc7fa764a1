//! Diagnostics hooks: header injection, extraction and structured events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use conveyor::prelude::*;
use conveyor::{BusEvent, Diagnostics, Headers, InMemoryQueue, PollingOptions};
use tracing::Span;

use crate::support::{trace, MyEvent, RecordingHandler};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    extracted: Mutex<Vec<String>>,
}

impl Diagnostics for Recorder {
    fn inject(&self, headers: &mut Headers) {
        headers.insert_str("traceparent", "00-trace-span-01");
    }

    fn extract(&self, headers: &Headers) -> Option<Span> {
        if let Some(value) = headers.get_str("traceparent") {
            self.extracted.lock().unwrap().push(value.to_string());
        }
        None
    }

    fn event(&self, event: &BusEvent<'_>) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

#[tokio::test]
async fn trace_context_travels_with_the_message() {
    let queue = InMemoryQueue::new();
    let recorder = Arc::new(Recorder::default());
    let connection = Arc::new(Connection::new(queue.clone()).with_diagnostics(recorder.clone()));

    Publisher::new(connection.clone())
        .with_diagnostics(recorder.clone())
        .publish(&MyEvent { name: "traced".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();
    assert_eq!(
        queue.sent()[0].headers.get_str("traceparent"),
        Some("00-trace-span-01")
    );

    let seen = trace();
    let s = seen.clone();
    let processor = MessageProcessor::builder()
        .handle::<MyEvent, _, _>(move || RecordingHandler { trace: s.clone() })
        .diagnostics(recorder.clone())
        .build()
        .unwrap();
    let polling = PollingProcessor::new(connection, "q1", processor).with_options(
        PollingOptions::default().with_poll_interval(Duration::from_millis(10)),
    );

    let source = CancellationSource::new();
    let handle = polling.spawn(source.token());
    tokio::time::sleep(Duration::from_millis(100)).await;
    source.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(
        *recorder.extracted.lock().unwrap(),
        vec!["00-trace-span-01".to_string()]
    );
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["connected", "published", "received", "dispatched"]
    );
}

#[tokio::test]
async fn failed_attempts_are_reported() {
    let queue = InMemoryQueue::new();
    queue.fail_next_sends(1);
    let recorder = Arc::new(Recorder::default());

    Publisher::new(Arc::new(Connection::new(queue.clone())))
        .with_diagnostics(recorder.clone())
        .with_retry(
            conveyor::RetryPolicy::default()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(1)),
        )
        .publish(&MyEvent { name: "flaky".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["publish_failed", "published"]
    );
}
