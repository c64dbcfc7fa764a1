//! Processors - receive loops that turn transport deliveries into handler calls.
//!
//! Two shapes share one core:
//!
//! - [`PollingProcessor`]: claim up to N deliveries, dispatch each, sleep the
//!   poll interval, repeat. For pull transports (`Listener`).
//! - [`PushProcessor`]: register a callback with the transport and wait for
//!   cancellation. For push transports (`Subscriber`).
//!
//! Both hand every delivery to a [`MessageProcessor`], which decodes the
//! envelope, runs the middleware pipeline and dispatches to a handler.
//!
//! ## Example
//!
//! ```ignore
//! let processor = MessageProcessor::builder()
//!     .handle::<OrderCreated, _, _>(|| ReserveStock::default())
//!     .middleware(CorrelationMiddleware)
//!     .on_error(Arc::new(|err: &BusError, delivery: &Delivery| eprintln!("{}: {}", delivery.id, err)))
//!     .build()?;
//!
//! let polling = PollingProcessor::new(connection, "orders", processor);
//! let source = CancellationSource::new();
//! let handle = polling.spawn(source.token());
//!
//! // ... later
//! source.cancel();
//! let stats = handle.await??;
//! ```

mod polling;
mod push;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::Instrument;

use crate::bus::Delivery;
use crate::cancel::CancellationToken;
use crate::diagnostics::{BusEvent, Diagnostics, TracingDiagnostics};
use crate::dispatch::{Dispatcher, DispatcherBuilder, Handler, ProcessCallback};
use crate::error::BusError;
use crate::message::{EnvelopeCodec, Message, TypeRegistry};
use crate::pipeline::{MessageContext, Middleware, Pipeline, ProcessEventArgs};

pub use polling::{PollingOptions, PollingProcessor};
pub use push::PushProcessor;

/// Called for every delivery that could not be handled.
pub type ErrorCallback = Arc<dyn Fn(&BusError, &Delivery) + Send + Sync>;

/// Counters reported when a receive loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Number of receive cycles completed.
    pub polls: u64,
    /// Number of messages successfully handled.
    pub handled: u64,
    /// Number of messages whose handler (or middleware) failed.
    pub failed: u64,
    /// Number of deliveries that could not be decoded.
    pub unprocessable: u64,
}

#[derive(Debug, Default)]
struct StatsCounter {
    polls: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    unprocessable: AtomicU64,
}

impl StatsCounter {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            polls: self.polls.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unprocessable: self.unprocessable.load(Ordering::Relaxed),
        }
    }
}

/// Lifecycle of a receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    Idle = 0,
    Connecting = 1,
    Polling = 2,
    Receiving = 3,
    Dispatching = 4,
    Stopped = 5,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProcessorState::Connecting,
            2 => ProcessorState::Polling,
            3 => ProcessorState::Receiving,
            4 => ProcessorState::Dispatching,
            5 => ProcessorState::Stopped,
            _ => ProcessorState::Idle,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> ProcessorState {
        ProcessorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ProcessorState) {
        let previous = ProcessorState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::trace!(from = ?previous, to = ?state, "processor state changed");
        }
    }

    /// Move to `to` only while in `from`. Returns whether it moved.
    pub(crate) fn transition(&self, from: ProcessorState, to: ProcessorState) -> bool {
        let moved = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            tracing::trace!(from = ?from, to = ?to, "processor state changed");
        }
        moved
    }
}

/// Decode → pipeline → dispatch, shared by every processor shape.
pub struct MessageProcessor {
    codec: EnvelopeCodec,
    pipeline: Pipeline,
    dispatcher: Dispatcher,
    diagnostics: Arc<dyn Diagnostics>,
    on_error: Option<ErrorCallback>,
    stats: StatsCounter,
}

impl MessageProcessor {
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::default()
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.codec.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.snapshot()
    }

    pub(crate) fn record_poll(&self) {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Handle one delivery.
    ///
    /// Failures are counted, reported to the diagnostics sink and the error
    /// callback, then returned so the transport can settle the delivery.
    pub async fn process(
        &self,
        delivery: &Delivery,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        self.diagnostics.event(&BusEvent::Received {
            message_id: &delivery.id,
            queue: &delivery.queue,
        });

        let message = match self.codec.decode(&delivery.body) {
            Ok(message) => message,
            Err(err) => {
                self.stats.unprocessable.fetch_add(1, Ordering::Relaxed);
                self.report(delivery, None, &err);
                return Err(err);
            }
        };

        let message_type = message.type_name().to_string();
        let span = match self.diagnostics.extract(&delivery.headers) {
            Some(parent) => tracing::info_span!(
                parent: &parent,
                "conveyor.dispatch",
                message_id = %delivery.id,
                queue = %delivery.queue,
                message_type = %message_type
            ),
            None => tracing::info_span!(
                "conveyor.dispatch",
                message_id = %delivery.id,
                queue = %delivery.queue,
                message_type = %message_type
            ),
        };

        let args = ProcessEventArgs::from_delivery(delivery, cancel.clone());
        let mut ctx = MessageContext::new(message, args);
        let result = self
            .pipeline
            .run(&mut ctx, &self.dispatcher)
            .instrument(span)
            .await;

        match &result {
            Ok(()) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.event(&BusEvent::Dispatched {
                    message_id: &delivery.id,
                    queue: &delivery.queue,
                    message_type: &message_type,
                });
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.report(delivery, Some(&message_type), err);
            }
        }
        result
    }

    fn report(&self, delivery: &Delivery, message_type: Option<&str>, err: &BusError) {
        self.diagnostics.event(&BusEvent::DispatchFailed {
            message_id: &delivery.id,
            queue: &delivery.queue,
            message_type,
            error: err,
        });
        if let Some(on_error) = &self.on_error {
            on_error(err, delivery);
        }
    }
}

/// Builder for [`MessageProcessor`].
///
/// Registering a handler also registers its message type, so only types
/// handled by the fallback callback need an explicit [`register`](Self::register).
#[derive(Default)]
pub struct ProcessorBuilder {
    registry: TypeRegistry,
    dispatcher: DispatcherBuilder,
    pipeline: Pipeline,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    on_error: Option<ErrorCallback>,
}

impl ProcessorBuilder {
    /// Make `M` decodable without giving it a typed handler.
    pub fn register<M: Message>(mut self) -> Self {
        self.registry.add::<M>();
        self
    }

    /// Register `M` and the handler factory that serves it.
    pub fn handle<M, H, F>(mut self, factory: F) -> Self
    where
        M: Message,
        H: Handler<M> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry.add::<M>();
        self.dispatcher.add::<M, H, F>(factory);
        self
    }

    /// Append a middleware step. Steps run in the order they are added.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.pipeline.push(Arc::new(middleware));
        self
    }

    pub fn on_process(mut self, callback: ProcessCallback) -> Self {
        self.dispatcher.set_on_process(callback);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Validate the registrations and build the processor.
    ///
    /// Duplicate type names, duplicate handlers and a processor with nothing
    /// to dispatch to all fail here with `BusError::Configuration`.
    pub fn build(self) -> Result<MessageProcessor, BusError> {
        if self.registry.is_empty() {
            return Err(BusError::Configuration(
                "no message types registered".into(),
            ));
        }
        if let Err(err) = self.registry.validate() {
            tracing::error!(error = %err, "message registry is invalid");
            return Err(err);
        }
        let dispatcher = self.dispatcher.build().inspect_err(|err| {
            tracing::error!(error = %err, "handler registrations are invalid");
        })?;

        Ok(MessageProcessor {
            codec: EnvelopeCodec::new(Arc::new(self.registry)),
            pipeline: self.pipeline,
            dispatcher,
            diagnostics: self
                .diagnostics
                .unwrap_or_else(|| Arc::new(TracingDiagnostics)),
            on_error: self.on_error,
            stats: StatsCounter::default(),
        })
    }
}
