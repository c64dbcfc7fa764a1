//! Polling processor - claims batches from a pull-style transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{MessageProcessor, ProcessorState, ProcessorStats, StateCell};
use crate::bus::{Connection, Connector, Delivery, Listener};
use crate::cancel::CancellationToken;
use crate::error::BusError;

/// Cadence of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingOptions {
    /// Sleep between polls that came back short.
    pub poll_interval: Duration,
    /// Maximum deliveries claimed per poll. Zero is treated as one.
    pub batch_size: usize,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 10,
        }
    }
}

impl PollingOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}

/// Pull-style receive loop over a [`Listener`] transport.
///
/// Each cycle claims up to `batch_size` deliveries, dispatches them in claim
/// order and then sleeps for the poll interval. A full batch skips the
/// sleep. Cancellation is observed between deliveries and during the sleep;
/// claimed deliveries that were not started are released back to the
/// transport.
pub struct PollingProcessor<C: Connector> {
    connection: Arc<Connection<C>>,
    queue: String,
    processor: Arc<MessageProcessor>,
    options: PollingOptions,
    state: StateCell,
}

impl<C> PollingProcessor<C>
where
    C: Connector,
    C::Client: Listener,
{
    pub fn new(
        connection: Arc<Connection<C>>,
        queue: impl Into<String>,
        processor: impl Into<Arc<MessageProcessor>>,
    ) -> Self {
        Self {
            connection,
            queue: queue.into(),
            processor: processor.into(),
            options: PollingOptions::default(),
            state: StateCell::default(),
        }
    }

    pub fn with_options(mut self, options: PollingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn state(&self) -> ProcessorState {
        self.state.get()
    }

    pub fn processor(&self) -> &MessageProcessor {
        &self.processor
    }

    /// Run the receive loop until `cancel` fires.
    ///
    /// Returns the processor's counters. Fails only when the transport cannot
    /// be connected or reports a non-transient receive error.
    pub async fn wait_for_events(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProcessorStats, BusError> {
        let result = self.run(cancel).await;
        self.state.set(ProcessorState::Stopped);
        match &result {
            Ok(stats) => tracing::info!(
                queue = %self.queue,
                handled = stats.handled,
                failed = stats.failed,
                "polling processor stopped"
            ),
            Err(err) => tracing::error!(queue = %self.queue, error = %err, "polling processor failed"),
        }
        result
    }

    /// Run [`wait_for_events`](Self::wait_for_events) on a tokio task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<ProcessorStats, BusError>> {
        tokio::spawn(async move { self.wait_for_events(&cancel).await })
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<ProcessorStats, BusError> {
        self.state.set(ProcessorState::Connecting);
        let client = tokio::select! {
            client = self.connection.ensure_connected() => client?,
            _ = cancel.cancelled() => return Ok(self.processor.stats()),
        };

        tracing::info!(
            queue = %self.queue,
            application_id = ?self.connection.application_id(),
            "polling processor started"
        );

        let batch_size = self.options.batch_size.max(1);
        while !cancel.is_cancelled() {
            self.state.set(ProcessorState::Polling);
            self.processor.record_poll();

            let batch = match client.receive(&self.queue, batch_size).await {
                Ok(batch) => batch,
                Err(err) if err.is_transient() => {
                    tracing::warn!(queue = %self.queue, error = %err, "receive failed, will retry");
                    if !cancel.sleep(self.options.poll_interval).await {
                        break;
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let full = batch.len() >= batch_size;
            self.dispatch_batch(client.as_ref(), batch, cancel).await;

            if cancel.is_cancelled() {
                break;
            }
            if !full && !cancel.sleep(self.options.poll_interval).await {
                break;
            }
        }

        Ok(self.processor.stats())
    }

    async fn dispatch_batch(
        &self,
        client: &C::Client,
        batch: Vec<Delivery>,
        cancel: &CancellationToken,
    ) {
        let mut deliveries = batch.into_iter();
        while let Some(delivery) = deliveries.next() {
            if cancel.is_cancelled() {
                let unstarted: Vec<Delivery> =
                    std::iter::once(delivery).chain(deliveries).collect();
                self.release(client, &unstarted).await;
                return;
            }

            self.state.set(ProcessorState::Dispatching);
            let settled = match self.processor.process(&delivery, cancel).await {
                Ok(()) => client.complete(&delivery).await,
                Err(err) => client.reject(&delivery, &err.to_string()).await,
            };
            if let Err(err) = settled {
                tracing::warn!(
                    message_id = %delivery.id,
                    queue = %self.queue,
                    error = %err,
                    "failed to settle delivery"
                );
            }
        }
    }

    async fn release(&self, client: &C::Client, deliveries: &[Delivery]) {
        for delivery in deliveries {
            if let Err(err) = client.release(delivery).await {
                tracing::warn!(
                    message_id = %delivery.id,
                    queue = %self.queue,
                    error = %err,
                    "failed to release delivery"
                );
            }
        }
        tracing::debug!(queue = %self.queue, released = deliveries.len(), "released unstarted deliveries");
    }
}
