//! Push processor - hands a callback to a push-style transport.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use super::{MessageProcessor, ProcessorState, ProcessorStats, StateCell};
use crate::bus::{Connection, Connector, Delivery, DeliveryCallback, Subscriber};
use crate::cancel::CancellationToken;
use crate::error::BusError;

/// Push-style receive loop over a [`Subscriber`] transport.
///
/// Registers a callback with the transport's own receive loop, then waits
/// for cancellation and stops it. Whether a failed delivery is redelivered
/// is up to the transport.
pub struct PushProcessor<C: Connector> {
    connection: Arc<Connection<C>>,
    queue: String,
    processor: Arc<MessageProcessor>,
    state: Arc<StateCell>,
}

impl<C> PushProcessor<C>
where
    C: Connector,
    C::Client: Subscriber,
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
            state: Arc::default(),
        }
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

    /// Start the transport callback and block until `cancel` fires.
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
                "push processor stopped"
            ),
            Err(err) => tracing::error!(queue = %self.queue, error = %err, "push processor failed"),
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

        let processor = Arc::clone(&self.processor);
        let state = Arc::clone(&self.state);
        let token = cancel.clone();
        let callback: DeliveryCallback = Arc::new(move |delivery: Delivery| -> BoxFuture<'static, Result<(), BusError>> {
            let processor = Arc::clone(&processor);
            let state = Arc::clone(&state);
            let token = token.clone();
            Box::pin(async move {
                let dispatching =
                    state.transition(ProcessorState::Receiving, ProcessorState::Dispatching);
                let result = processor.process(&delivery, &token).await;
                if dispatching {
                    state.transition(ProcessorState::Dispatching, ProcessorState::Receiving);
                }
                result
            })
        });

        self.state.set(ProcessorState::Receiving);
        client.start(&self.queue, callback).await?;
        tracing::info!(
            queue = %self.queue,
            application_id = ?self.connection.application_id(),
            "push processor started"
        );

        cancel.cancelled().await;
        client.stop(&self.queue).await?;

        Ok(self.processor.stats())
    }
}
