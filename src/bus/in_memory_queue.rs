//! In-memory queue for testing and single-process scenarios.
//!
//! This module provides a thread-safe in-memory transport that is its own
//! `Connector` and implements `Sender`, `Listener` and `Subscriber`, useful for:
//! - Unit and integration testing without external dependencies
//! - Single-process applications
//! - Exercising both pull-style and push-style processors

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Connector, Delivery, DeliveryCallback, Listener, OutgoingMessage, Sender, Subscriber};
use crate::error::BusError;

/// In-memory transport.
///
/// Features:
/// - Cheap to clone; clones share the same queues
/// - One FIFO channel per named queue
/// - Pull (`receive`) or push (`start`/`stop`) consumption per queue
/// - Append-only log of everything sent, for assertions
/// - Failure injection (`fail_next_sends`, `set_unreachable`) for retry tests
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
///
/// use conveyor::{CancellationToken, Connection, InMemoryQueue, Message, Publisher};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, Message)]
/// #[message(name = "orders.created")]
/// struct OrderCreated {
///     id: String,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), conveyor::BusError> {
/// let queue = InMemoryQueue::new();
/// let publisher = Publisher::new(Arc::new(Connection::new(queue.clone())));
///
/// publisher
///     .publish(&OrderCreated { id: "o1".into() }, "orders", &CancellationToken::none())
///     .await?;
///
/// let sent = queue.sent_to("orders");
/// assert_eq!(sent.len(), 1);
/// assert_eq!(sent[0].body, r#"{"$type":"orders.created","id":"o1"}"#);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    log: RwLock<Vec<(String, OutgoingMessage)>>,
    completed: Mutex<Vec<String>>,
    rejected: Mutex<Vec<String>>,
    serial: AtomicI64,
    connects: AtomicUsize,
    unreachable: AtomicBool,
    failing_sends: AtomicU32,
}

struct QueueState {
    tx: mpsc::UnboundedSender<Delivery>,
    /// `None` while a push subscriber owns the receiving end.
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
    worker: Option<Worker>,
}

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<mpsc::UnboundedReceiver<Delivery>>,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            worker: None,
        }
    }
}

impl InMemoryQueue {
    /// Create a new in-memory queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect` fail with `BusError::Connection` while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` sends with a transient transport error.
    pub fn fail_next_sends(&self, count: u32) {
        self.inner.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Number of clients handed out by `connect`.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Get everything sent, in order.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.log().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Get everything sent to one queue, in order.
    pub fn sent_to(&self, queue: &str) -> Vec<OutgoingMessage> {
        self.log()
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Get the total number of messages sent.
    pub fn len(&self) -> usize {
        self.log().len()
    }

    /// Check if nothing has been sent.
    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    /// Number of messages waiting in `queue` (zero while a subscriber owns it).
    pub fn pending(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(queue)
            .and_then(|state| state.rx.as_ref())
            .map(|rx| rx.len())
            .unwrap_or(0)
    }

    /// Get acknowledged message IDs.
    pub fn completed(&self) -> Vec<String> {
        self.inner
            .completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get rejected message IDs.
    pub fn rejected(&self) -> Vec<String> {
        self.inner
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn log(&self) -> std::sync::RwLockReadGuard<'_, Vec<(String, OutgoingMessage)>> {
        self.inner.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn queues(&self) -> Result<MutexGuard<'_, HashMap<String, QueueState>>, BusError> {
        self.inner
            .queues
            .lock()
            .map_err(|_| BusError::permanent("in-memory queue lock poisoned"))
    }

    fn enqueue(&self, delivery: Delivery) -> Result<(), BusError> {
        let mut queues = self.queues()?;
        let state = queues
            .entry(delivery.queue.clone())
            .or_insert_with(QueueState::new);
        state
            .tx
            .send(delivery)
            .map_err(|_| BusError::permanent("in-memory queue closed"))
    }

    fn record(list: &Mutex<Vec<String>>, id: String) {
        list.lock().unwrap_or_else(PoisonError::into_inner).push(id);
    }
}

#[async_trait]
impl Connector for InMemoryQueue {
    type Client = InMemoryQueue;

    async fn connect(&self) -> Result<InMemoryQueue, BusError> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(BusError::Connection("in-memory transport unreachable".into()));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }
}

#[async_trait]
impl Sender for InMemoryQueue {
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<(), BusError> {
        let failing = self
            .inner
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BusError::transient("simulated send failure"));
        }

        let delivery = Delivery {
            id: message.id.clone(),
            queue: queue.to_string(),
            body: message.body.clone(),
            headers: message.headers.clone(),
            serial: Some(self.inner.serial.fetch_add(1, Ordering::SeqCst) + 1),
            producer: message.producer.clone(),
            enqueued_at: Some(Utc::now()),
        };

        self.inner
            .log
            .write()
            .map_err(|_| BusError::permanent("in-memory log poisoned"))?
            .push((queue.to_string(), message));

        self.enqueue(delivery)
    }
}

#[async_trait]
impl Listener for InMemoryQueue {
    async fn receive(&self, queue: &str, max: usize) -> Result<Vec<Delivery>, BusError> {
        let mut queues = self.queues()?;
        let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        let Some(rx) = state.rx.as_mut() else {
            return Err(BusError::Configuration(format!(
                "queue '{}' is owned by a push subscriber",
                queue
            )));
        };

        let mut batch = Vec::new();
        while batch.len() < max {
            match rx.try_recv() {
                Ok(delivery) => batch.push(delivery),
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), BusError> {
        Self::record(&self.inner.completed, delivery.id.clone());
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, _reason: &str) -> Result<(), BusError> {
        // No dead-letter queue; the message is dropped after being recorded.
        Self::record(&self.inner.rejected, delivery.id.clone());
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.enqueue(delivery.clone())
    }
}

#[async_trait]
impl Subscriber for InMemoryQueue {
    async fn start(&self, queue: &str, callback: DeliveryCallback) -> Result<(), BusError> {
        let mut queues = self.queues()?;
        let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        let Some(mut rx) = state.rx.take() else {
            return Err(BusError::Configuration(format!(
                "queue '{}' already has a subscriber",
                queue
            )));
        };

        let (stop, mut stopped) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    delivery = rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        let id = delivery.id.clone();
                        match callback(delivery).await {
                            Ok(()) => Self::record(&inner.completed, id),
                            Err(_) => Self::record(&inner.rejected, id),
                        }
                    }
                }
            }
            rx
        });

        state.worker = Some(Worker { stop, handle });
        tracing::debug!(queue, "in-memory subscriber started");
        Ok(())
    }

    async fn stop(&self, queue: &str) -> Result<(), BusError> {
        let worker = self.queues()?.get_mut(queue).and_then(|s| s.worker.take());
        let Some(worker) = worker else {
            return Ok(());
        };

        let _ = worker.stop.send(());
        let rx = worker
            .handle
            .await
            .map_err(|e| BusError::permanent(format!("subscriber task failed: {}", e)))?;

        if let Some(state) = self.queues()?.get_mut(queue) {
            state.rx = Some(rx);
        }
        tracing::debug!(queue, "in-memory subscriber stopped");
        Ok(())
    }
}
