//! Sender trait for point-to-point messaging.

use async_trait::async_trait;

use super::Headers;
use crate::error::BusError;

/// A serialized message on its way to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Unique identifier for this message.
    pub id: String,
    /// Wire type name (the envelope discriminator).
    pub type_name: String,
    /// Envelope JSON.
    pub body: String,
    /// Transport headers (trace context, correlation IDs, etc.).
    pub headers: Headers,
    /// Application that produced the message, if known.
    pub producer: Option<String>,
}

/// Trait for sending messages to a named queue.
///
/// Implemented by transport clients. Failures that may succeed on retry
/// must be reported as transient (`BusError::transient` or
/// `BusError::Connection`); the `Publisher` only retries those.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send a message to a named queue.
    async fn send(&self, queue: &str, message: OutgoingMessage) -> Result<(), BusError>;
}
