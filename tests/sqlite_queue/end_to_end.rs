//! Publish through SQLite, consume with a polling processor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor::prelude::*;
use conveyor::sqlite::EventState;
use conveyor::{PollingOptions, ProcessorStats};

use crate::support::{processor, MyEvent, Seen, TestDb};

fn fast() -> PollingOptions {
    PollingOptions::default().with_poll_interval(Duration::from_millis(20))
}

async fn run_for(db: &TestDb, seen: &Seen, queue: &str, duration: Duration) -> ProcessorStats {
    let source = CancellationSource::new();
    let handle = PollingProcessor::new(db.connection.clone(), queue, processor(seen))
        .with_options(fast())
        .spawn(source.token());
    tokio::time::sleep(duration).await;
    source.cancel();
    handle.await.unwrap().unwrap()
}

#[tokio::test]
async fn jack_is_dispatched_once() {
    let db = TestDb::new();
    let seen = Seen::default();

    let id = db
        .publisher()
        .publish(&MyEvent { name: "Jack!".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let row = db.queue().await.find(&id).await.unwrap().unwrap();
    assert_eq!(row.state, EventState::Pending);
    assert!(row.payload.starts_with(r#"{"$type":"sqlite_queue::support::MyEvent""#));
    assert!(row.payload.contains(r#""Name":"Jack!""#));
    assert_eq!(row.producer.as_deref(), Some("sqlite-tests"));

    let stats = run_for(&db, &seen, "q1", Duration::from_millis(200)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["Jack!"]);
    assert_eq!(stats.handled, 1);
    // Kept as Claimed by default.
    let row = db.queue().await.find(&id).await.unwrap().unwrap();
    assert_eq!(row.state, EventState::Claimed);
}

#[tokio::test]
async fn delete_processed_removes_handled_rows() {
    let db = TestDb::with_options(|options| options.with_delete_processed(true));
    let seen = Seen::default();

    let id = db
        .publisher()
        .publish(&MyEvent { name: "Jack!".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();
    run_for(&db, &seen, "q1", Duration::from_millis(200)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["Jack!"]);
    assert!(db.queue().await.find(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_rows_stay_claimed_and_later_rows_are_handled() {
    let db = TestDb::with_options(|options| options.with_delete_processed(true));
    let seen = Seen::default();
    let publisher = db.publisher();

    let mut ids = Vec::new();
    for name in ["one", "fail-two", "three"] {
        ids.push(
            publisher
                .publish(&MyEvent { name: name.into() }, "q1", &CancellationToken::none())
                .await
                .unwrap(),
        );
    }
    let stats = run_for(&db, &seen, "q1", Duration::from_millis(250)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["one", "three"]);
    assert_eq!(stats.failed, 1);

    let queue = db.queue().await;
    assert!(queue.find(&ids[0]).await.unwrap().is_none());
    let failed = queue.find(&ids[1]).await.unwrap().unwrap();
    assert_eq!(failed.state, EventState::Claimed);
    assert_eq!(queue.claimed_count("q1").await.unwrap(), 1);
    assert_eq!(queue.pending_count("q1").await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_headers_do_not_stop_the_consumer() {
    let db = TestDb::new();
    let seen = Seen::default();
    let publisher = db.publisher();

    publisher
        .publish(&MyEvent { name: "good-1".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO Events (EventState, EventId, QueueName, EventData, ClientName, CreatedAt, EventHeaders)
         VALUES (0, 'foreign-1', 'q1', ?, 'other-writer', ?, 'not-json')",
    )
    .bind(r#"{"$type":"sqlite_queue::support::MyEvent","Name":"foreign"}"#)
    .bind(chrono::Utc::now())
    .execute(db.queue().await.pool())
    .await
    .unwrap();
    publisher
        .publish(&MyEvent { name: "good-2".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let stats = run_for(&db, &seen, "q1", Duration::from_millis(200)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["good-1", "foreign", "good-2"]);
    assert_eq!(stats.handled, 3);
    let queue = db.queue().await;
    assert_eq!(queue.pending_count("q1").await.unwrap(), 0);
    assert_eq!(queue.claimed_count("q1").await.unwrap(), 3);
}

#[tokio::test]
async fn queues_are_isolated() {
    let db = TestDb::new();
    let seen = Seen::default();

    db.publisher()
        .publish(&MyEvent { name: "elsewhere".into() }, "q2", &CancellationToken::none())
        .await
        .unwrap();
    run_for(&db, &seen, "q1", Duration::from_millis(100)).await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(db.queue().await.pending_count("q2").await.unwrap(), 1);
}

#[tokio::test]
async fn cancel_returns_within_one_poll_interval() {
    let db = TestDb::new();
    let seen = Seen::default();
    let interval = Duration::from_millis(300);

    let source = CancellationSource::new();
    let handle = PollingProcessor::new(db.connection.clone(), "q1", processor(&seen))
        .with_options(PollingOptions::default().with_poll_interval(interval))
        .spawn(source.token());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    source.cancel();
    handle.await.unwrap().unwrap();
    assert!(started.elapsed() < interval);

    // Nothing published after cancellation is claimed.
    db.publisher()
        .publish(&MyEvent { name: "late".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(db.queue().await.pending_count("q1").await.unwrap(), 1);
}

#[tokio::test]
async fn settings_wire_a_working_bus() {
    let db = TestDb::new();
    let config = config::Config::builder()
        .set_override("connection_string", db.url())
        .unwrap()
        .set_override("delete_processed_events", true)
        .unwrap()
        .set_override("poll_interval_ms", 20)
        .unwrap()
        .build()
        .unwrap();
    let settings = conveyor::BusSettings::from_config(config).unwrap();

    let connection = Arc::new(Connection::new(SqliteConnector::new(settings.sqlite_options())));
    let id = Publisher::new(connection.clone())
        .with_retry(settings.retry_policy())
        .publish(&MyEvent { name: "configured".into() }, "q1", &CancellationToken::none())
        .await
        .unwrap();

    let seen = Seen::default();
    let source = CancellationSource::new();
    let handle = PollingProcessor::new(connection.clone(), "q1", processor(&seen))
        .with_options(settings.polling_options())
        .spawn(source.token());
    tokio::time::sleep(Duration::from_millis(200)).await;
    source.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["configured"]);
    let queue = connection.ensure_connected().await.unwrap();
    assert!(queue.find(&id).await.unwrap().is_none());
}
