//! Listener trait for pull-style (polling) consumption.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Headers;
use crate::error::BusError;

/// A message received from a transport, before deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Message identifier assigned by the publisher.
    pub id: String,
    /// Queue the message was received from.
    pub queue: String,
    /// Envelope JSON.
    pub body: String,
    pub headers: Headers,
    /// Transport sequence number, when the transport has one.
    pub serial: Option<i64>,
    pub producer: Option<String>,
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl Delivery {
    pub fn new(id: impl Into<String>, queue: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            body: body.into(),
            headers: Headers::new(),
            serial: None,
            producer: None,
            enqueued_at: None,
        }
    }
}

/// Trait for claiming messages from a named queue.
///
/// Each message is handed to exactly one listener (competing consumers).
/// `receive` must be atomic with respect to other listeners: two concurrent
/// callers never get the same message.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Claim up to `max` messages, oldest first. Returns an empty batch when
    /// the queue is drained.
    async fn receive(&self, queue: &str, max: usize) -> Result<Vec<Delivery>, BusError>;

    /// Acknowledge that a delivery has been handled.
    async fn complete(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Report that handling failed. The default leaves the message where it
    /// is; transports with dead-lettering may override.
    async fn reject(&self, _delivery: &Delivery, _reason: &str) -> Result<(), BusError> {
        Ok(())
    }

    /// Give back a delivery that was claimed but never handed to a handler
    /// (the consumer stopped mid-batch).
    async fn release(&self, _delivery: &Delivery) -> Result<(), BusError> {
        Ok(())
    }
}
