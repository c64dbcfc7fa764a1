//! Handler dispatch - routes a decoded message to its registered handler.
//!
//! `Dispatcher` maps a message type to exactly one handler, fixed when it is
//! built. Messages with no handler fall back to the on-process callback, if
//! one was supplied.
//!
//! ## Example
//!
//! ```ignore
//! struct SendWelcomeEmail { mailer: Mailer }
//!
//! #[async_trait]
//! impl Handler<UserRegistered> for SendWelcomeEmail {
//!     async fn handle(&self, event: &UserRegistered, args: &ProcessEventArgs) -> Result<(), BusError> {
//!         self.mailer.welcome(&event.email).await.map_err(BusError::handler)
//!     }
//! }
//!
//! let dispatcher = Dispatcher::builder()
//!     .handler::<UserRegistered, _, _>(move || SendWelcomeEmail { mailer: mailer.clone() })
//!     .build()?;
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::BusError;
use crate::message::{Message, ReceivedMessage};
use crate::pipeline::{Endpoint, MessageContext, ProcessEventArgs};

/// Handles one message type.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, message: &M, args: &ProcessEventArgs) -> Result<(), BusError>;
}

/// Ad-hoc callback for messages without a typed handler.
pub type ProcessCallback = Arc<
    dyn Fn(ReceivedMessage, ProcessEventArgs) -> BoxFuture<'static, Result<(), BusError>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`ProcessCallback`].
pub fn callback<F, Fut>(f: F) -> ProcessCallback
where
    F: Fn(ReceivedMessage, ProcessEventArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BusError>> + Send + 'static,
{
    Arc::new(
        move |message: ReceivedMessage,
              args: ProcessEventArgs|
              -> BoxFuture<'static, Result<(), BusError>> { Box::pin(f(message, args)) },
    )
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(
        &self,
        message: &ReceivedMessage,
        args: &ProcessEventArgs,
    ) -> Result<(), BusError>;
}

/// A handler factory for `M`. The factory runs once per message, so every
/// dispatch gets a fresh handler scope.
struct Registered<M, F> {
    factory: F,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H, F> ErasedHandler for Registered<M, F>
where
    M: Message,
    H: Handler<M> + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    async fn invoke(
        &self,
        message: &ReceivedMessage,
        args: &ProcessEventArgs,
    ) -> Result<(), BusError> {
        let typed = message.downcast_ref::<M>().ok_or_else(|| {
            BusError::Configuration(format!(
                "handler for '{}' received '{}'",
                M::type_name(),
                message.type_name()
            ))
        })?;
        let handler = (self.factory)();
        handler.handle(typed, args).await
    }
}

struct Route {
    type_id: TypeId,
    type_name: &'static str,
    handler: Arc<dyn ErasedHandler>,
}

/// Collects handler registrations.
///
/// Uses builder pattern. Validation happens in [`build`](Self::build).
#[derive(Default)]
pub struct DispatcherBuilder {
    routes: Vec<Route>,
    on_process: Option<ProcessCallback>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler factory for `M`.
    pub fn handler<M, H, F>(mut self, factory: F) -> Self
    where
        M: Message,
        H: Handler<M> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.add::<M, H, F>(factory);
        self
    }

    pub fn add<M, H, F>(&mut self, factory: F)
    where
        M: Message,
        H: Handler<M> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.routes.push(Route {
            type_id: TypeId::of::<M>(),
            type_name: M::type_name(),
            handler: Arc::new(Registered::<M, F> {
                factory,
                _message: PhantomData,
            }),
        });
    }

    /// Callback for messages that have no typed handler.
    pub fn on_process(mut self, callback: ProcessCallback) -> Self {
        self.on_process = Some(callback);
        self
    }

    pub fn set_on_process(&mut self, callback: ProcessCallback) {
        self.on_process = Some(callback);
    }

    /// Build the dispatcher.
    ///
    /// Fails with `BusError::Configuration` when a type has more than one
    /// handler, or when there are no handlers and no callback.
    pub fn build(self) -> Result<Dispatcher, BusError> {
        if self.routes.is_empty() && self.on_process.is_none() {
            return Err(BusError::Configuration(
                "no handlers registered and no on-process callback supplied".into(),
            ));
        }

        let mut handlers: HashMap<TypeId, (&'static str, Arc<dyn ErasedHandler>)> =
            HashMap::with_capacity(self.routes.len());
        for route in self.routes {
            if handlers.contains_key(&route.type_id) {
                return Err(BusError::Configuration(format!(
                    "multiple handlers registered for message type '{}'",
                    route.type_name
                )));
            }
            handlers.insert(route.type_id, (route.type_name, route.handler));
        }

        Ok(Dispatcher {
            handlers,
            on_process: self.on_process,
        })
    }
}

/// Immutable message-type to handler map.
pub struct Dispatcher {
    handlers: HashMap<TypeId, (&'static str, Arc<dyn ErasedHandler>)>,
    on_process: Option<ProcessCallback>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Whether `M` has a typed handler.
    pub fn handles<M: Message>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<M>())
    }

    /// Type names with a typed handler, sorted.
    pub fn handled_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }

    /// Invoke the handler for `message`, or the fallback callback.
    pub async fn dispatch(
        &self,
        message: &ReceivedMessage,
        args: &ProcessEventArgs,
    ) -> Result<(), BusError> {
        if let Some((_, handler)) = self.handlers.get(&message.type_id()) {
            return handler.invoke(message, args).await;
        }
        match &self.on_process {
            Some(callback) => callback(message.clone(), args.clone()).await,
            None => Err(BusError::Configuration(format!(
                "no handler registered for message type '{}'",
                message.type_name()
            ))),
        }
    }
}

#[async_trait]
impl Endpoint for Dispatcher {
    async fn call(&self, ctx: &mut MessageContext) -> Result<(), BusError> {
        self.dispatch(ctx.message(), ctx.args()).await
    }
}
