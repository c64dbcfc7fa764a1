//! Per-message context shared by middleware and handlers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::bus::{Delivery, Headers};
use crate::cancel::CancellationToken;
use crate::message::ReceivedMessage;

/// Metadata delivered alongside a message.
///
/// Created per receive and dropped once handling finishes.
#[derive(Debug, Clone)]
pub struct ProcessEventArgs {
    pub message_id: String,
    pub queue: String,
    pub headers: Headers,
    pub producer: Option<String>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub cancellation: CancellationToken,
}

impl ProcessEventArgs {
    pub fn new(
        message_id: impl Into<String>,
        queue: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            queue: queue.into(),
            headers: Headers::new(),
            producer: None,
            enqueued_at: None,
            cancellation,
        }
    }

    /// Build args from a transport delivery.
    pub fn from_delivery(delivery: &Delivery, cancellation: CancellationToken) -> Self {
        Self {
            message_id: delivery.id.clone(),
            queue: delivery.queue.clone(),
            headers: delivery.headers.clone(),
            producer: delivery.producer.clone(),
            enqueued_at: delivery.enqueued_at,
            cancellation,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// What a middleware step sees: the decoded message, its delivery metadata
/// and a key/value bag that lives for one dispatch.
#[derive(Debug)]
pub struct MessageContext {
    message: ReceivedMessage,
    args: ProcessEventArgs,
    items: HashMap<String, Value>,
}

impl MessageContext {
    pub fn new(message: ReceivedMessage, args: ProcessEventArgs) -> Self {
        Self {
            message,
            args,
            items: HashMap::new(),
        }
    }

    pub fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    /// Wire-level type name of the message.
    pub fn message_type(&self) -> &str {
        self.message.type_name()
    }

    pub fn message_id(&self) -> &str {
        &self.args.message_id
    }

    pub fn queue(&self) -> &str {
        &self.args.queue
    }

    pub fn headers(&self) -> &Headers {
        &self.args.headers
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.args.cancellation
    }

    pub fn args(&self) -> &ProcessEventArgs {
        &self.args
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    /// Convenience for string items.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.items.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.items.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.items.remove(key)
    }

    pub fn items(&self) -> &HashMap<String, Value> {
        &self.items
    }
}
