//! Publisher - serializes messages and sends them with retry.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use super::{Connection, Connector, Headers, OutgoingMessage, Sender};
use crate::cancel::CancellationToken;
use crate::diagnostics::{BusEvent, Diagnostics, TracingDiagnostics};
use crate::error::BusError;
use crate::message::{envelope, EnvelopeOptions, Message};

/// Bounded exponential backoff for transient publish failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Per-call publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Caller-supplied message id. When set, every retry reuses it, so a
    /// transport that deduplicates on id makes the publish idempotent.
    /// When unset, each attempt gets a fresh id.
    pub message_id: Option<String>,
    /// Extra headers sent with the message.
    pub headers: Headers,
}

impl PublishOptions {
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: &str) -> Self {
        self.headers.insert_str(key, value);
        self
    }
}

/// Publishes typed messages through a shared [`Connection`].
///
/// Stateless apart from the connection, so one publisher can be shared by
/// any number of tasks.
///
/// ## Example
///
/// ```ignore
/// let publisher = Publisher::new(connection.clone());
/// let id = publisher
///     .publish(&MyEvent { name: "Jack!".into() }, "q1", &CancellationToken::none())
///     .await?;
/// ```
pub struct Publisher<C: Connector> {
    connection: Arc<Connection<C>>,
    retry: RetryPolicy,
    envelope: EnvelopeOptions,
    diagnostics: Arc<dyn Diagnostics>,
}

impl<C> Publisher<C>
where
    C: Connector,
    C::Client: Sender,
{
    pub fn new(connection: Arc<Connection<C>>) -> Self {
        Self {
            connection,
            retry: RetryPolicy::default(),
            envelope: EnvelopeOptions::default(),
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_envelope_options(mut self, options: EnvelopeOptions) -> Self {
        self.envelope = options;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Publish `message` to `queue`. Returns the id of the attempt that succeeded.
    pub async fn publish<M: Message>(
        &self,
        message: &M,
        queue: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BusError> {
        self.publish_with(message, queue, PublishOptions::default(), cancel)
            .await
    }

    /// Publish with explicit options (caller-supplied id, extra headers).
    pub async fn publish_with<M: Message>(
        &self,
        message: &M,
        queue: &str,
        options: PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<String, BusError> {
        // Serialization errors are never retried.
        let body = envelope::encode(message, self.envelope)?;
        let message_type = M::type_name();

        let span = tracing::info_span!(
            "conveyor.publish",
            queue,
            message_type,
            application_id = self.connection.application_id()
        );

        self.send_with_retry(queue, message_type, &body, &options, cancel)
            .instrument(span)
            .await
    }

    /// Publish several messages sequentially. Stops at the first failure.
    pub async fn publish_batch<M: Message>(
        &self,
        messages: &[M],
        queue: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BusError> {
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(self.publish(message, queue, cancel).await?);
        }
        Ok(ids)
    }

    async fn send_with_retry(
        &self,
        queue: &str,
        message_type: &str,
        body: &str,
        options: &PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<String, BusError> {
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(BusError::Cancelled);
            }
            attempt += 1;

            let message_id = options
                .message_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            match self
                .try_send(queue, &message_id, message_type, body, options, cancel)
                .await
            {
                Ok(()) => {
                    self.diagnostics.event(&BusEvent::Published {
                        message_id: &message_id,
                        queue,
                        message_type,
                        attempt,
                    });
                    return Ok(message_id);
                }
                Err(BusError::Cancelled) => return Err(BusError::Cancelled),
                Err(err) => {
                    let will_retry = err.is_transient() && attempt < max_attempts;
                    self.diagnostics.event(&BusEvent::PublishFailed {
                        message_id: &message_id,
                        queue,
                        message_type,
                        attempt,
                        will_retry,
                        error: &err,
                    });
                    if !will_retry {
                        return Err(err);
                    }
                    if !cancel.sleep(self.retry.delay_for(attempt)).await {
                        return Err(BusError::Cancelled);
                    }
                }
            }
        }
    }

    async fn try_send(
        &self,
        queue: &str,
        message_id: &str,
        message_type: &str,
        body: &str,
        options: &PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        let client = tokio::select! {
            client = self.connection.ensure_connected() => client?,
            _ = cancel.cancelled() => return Err(BusError::Cancelled),
        };

        let mut headers = options.headers.clone();
        self.diagnostics.inject(&mut headers);

        let outgoing = OutgoingMessage {
            id: message_id.to_string(),
            type_name: message_type.to_string(),
            body: body.to_string(),
            headers,
            producer: self.connection.application_id().map(str::to_string),
        };

        client.send(queue, outgoing).await
    }
}
