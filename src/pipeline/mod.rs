//! Middleware pipeline - ordered cross-cutting steps around dispatch.
//!
//! Steps run in registration order. Each receives the [`MessageContext`]
//! and a [`Next`] continuation; it may act before and after calling
//! `next.run(ctx)`, or return without calling it to short-circuit.
//!
//! For steps `[A, B]` and a terminal endpoint the order is:
//!
//! ```text
//! A (before) → B (before) → endpoint → B (after) → A (after)
//! ```
//!
//! The step list is fixed when the processor is built; only the endpoint
//! differs per dispatch.

mod context;
mod correlation;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;

pub use context::{MessageContext, ProcessEventArgs};
pub use correlation::{CorrelationMiddleware, CORRELATION_HEADER, CORRELATION_ITEM};

/// A cross-cutting step.
///
/// ## Example
///
/// ```ignore
/// struct Timing;
///
/// #[async_trait]
/// impl Middleware for Timing {
///     async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<(), BusError> {
///         let started = std::time::Instant::now();
///         let result = next.run(ctx).await;
///         tracing::debug!(elapsed = ?started.elapsed(), "dispatch finished");
///         result
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<(), BusError>;
}

/// The terminal step the pipeline wraps (normally the dispatcher).
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut MessageContext) -> Result<(), BusError>;
}

/// Continuation handed to a middleware step: the remaining steps plus the
/// endpoint.
pub struct Next<'a> {
    steps: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// Run the rest of the pipeline.
    pub async fn run(self, ctx: &mut MessageContext) -> Result<(), BusError> {
        match self.steps.split_first() {
            Some((step, rest)) => {
                let next = Next {
                    steps: rest,
                    endpoint: self.endpoint,
                };
                step.handle(ctx, next).await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}

/// Ordered middleware chain.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Uses builder pattern.
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.steps.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step around `endpoint`.
    pub async fn run(
        &self,
        ctx: &mut MessageContext,
        endpoint: &dyn Endpoint,
    ) -> Result<(), BusError> {
        Next {
            steps: &self.steps,
            endpoint,
        }
        .run(ctx)
        .await
    }
}
