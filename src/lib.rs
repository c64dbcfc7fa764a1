//! conveyor - a transport-agnostic event bus runtime.
//!
//! Producers publish typed messages; consumers process them through a
//! uniform pipeline regardless of the transport underneath.
//!
//! ```text
//! Publisher ──► envelope {"$type": ...} ──► Sender (transport)
//!
//! Listener / Subscriber (transport)
//!     ──► PollingProcessor / PushProcessor
//!     ──► envelope decode (TypeRegistry)
//!     ──► middleware pipeline
//!     ──► Dispatcher ──► Handler<M>
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use conveyor::prelude::*;
//!
//! #[derive(Serialize, Deserialize, Message)]
//! #[message(name = "greetings.sent")]
//! struct MyEvent { name: String }
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Handler<MyEvent> for Greeter {
//!     async fn handle(&self, event: &MyEvent, _args: &ProcessEventArgs) -> Result<(), BusError> {
//!         println!("hello {}", event.name);
//!         Ok(())
//!     }
//! }
//!
//! let connection = Arc::new(Connection::new(SqliteConnector::new(options)));
//! Publisher::new(connection.clone())
//!     .publish(&MyEvent { name: "Jack!".into() }, "q1", &CancellationToken::none())
//!     .await?;
//!
//! let processor = MessageProcessor::builder()
//!     .handle::<MyEvent, _, _>(|| Greeter)
//!     .build()?;
//! PollingProcessor::new(connection, "q1", processor)
//!     .wait_for_events(&cancel)
//!     .await?;
//! ```

extern crate self as conveyor;

pub mod bus;
pub mod cancel;
pub mod diagnostics;
pub mod dispatch;
mod error;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod processor;
pub mod settings;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use bus::{
    Connection, Connector, Delivery, Headers, InMemoryQueue, OutgoingMessage, PublishOptions,
    Publisher, RetryPolicy,
};
pub use cancel::{CancellationSource, CancellationToken};
pub use diagnostics::{BusEvent, Diagnostics, TracingDiagnostics};
pub use dispatch::{callback, Dispatcher, Handler, ProcessCallback};
pub use error::BusError;
pub use message::{EnvelopeCodec, EnvelopeOptions, Message, ReceivedMessage, TypeRegistry};
pub use pipeline::{CorrelationMiddleware, MessageContext, Middleware, Next, Pipeline, ProcessEventArgs};
pub use processor::{
    MessageProcessor, PollingOptions, PollingProcessor, ProcessorState, ProcessorStats,
    PushProcessor,
};
pub use settings::BusSettings;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnector, SqliteQueue, SqliteQueueOptions};

// Derive macro shares the trait's name; they live in different namespaces.
pub use conveyor_macros::Message;

// Re-exported so handler and middleware impls need no direct dependency.
pub use async_trait::async_trait;

/// Everything needed to wire publishers, processors and handlers.
pub mod prelude {
    pub use crate::{
        async_trait, BusError, CancellationSource, CancellationToken, Connection,
        CorrelationMiddleware, Handler, Message, MessageContext, MessageProcessor, Middleware,
        Next, PollingProcessor, ProcessEventArgs, Publisher, PushProcessor,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::{SqliteConnector, SqliteQueueOptions};
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
}
