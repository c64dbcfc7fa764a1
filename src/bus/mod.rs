//! Transport abstraction - the seam between the runtime and a message broker.
//!
//! A backend supplies a [`Connector`] whose client implements some of the
//! transport traits below. Everything above this module (publisher,
//! processors, dispatch) is written against the traits only.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Publisher / PollingProcessor / PushProcessor      │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Connection<C: Connector> (lazy, shared)           │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Transport client traits                    │
//! │  Sender:     send(queue, message)                            │
//! │  Listener:   receive(queue, max) / complete / release        │
//! │  Subscriber: start(queue, callback) / stop(queue)            │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                     │
//!          ▼                                     ▼
//! ┌─────────────────────┐              ┌─────────────────────┐
//! │   InMemoryQueue     │              │    SqliteQueue      │
//! │ (send/listen/push)  │              │  (send/listen)      │
//! └─────────────────────┘              └─────────────────────┘
//! ```

mod connection;
mod headers;
mod in_memory_queue;
mod listener;
mod publisher;
mod sender;
mod subscriber;

pub use connection::{Connection, Connector};
pub use headers::Headers;
pub use in_memory_queue::InMemoryQueue;
pub use listener::{Delivery, Listener};
pub use publisher::{PublishOptions, Publisher, RetryPolicy};
pub use sender::{OutgoingMessage, Sender};
pub use subscriber::{DeliveryCallback, Subscriber};
