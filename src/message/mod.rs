//! Messages - the typed payloads carried by the bus.
//!
//! A message is any serde-serializable struct that implements [`Message`].
//! On the wire it is identified by its type name, either set explicitly with
//! `#[message(name = "...")]` on the derive or defaulting to the
//! fully-qualified Rust type path.
//!
//! ```
//! use conveyor::Message;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize, Message)]
//! #[message(name = "orders.created")]
//! pub struct OrderCreated {
//!     pub order_id: String,
//! }
//!
//! assert_eq!(OrderCreated::type_name(), "orders.created");
//! ```

pub(crate) mod envelope;
mod registry;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use envelope::{EnvelopeCodec, EnvelopeOptions, DISCRIMINATOR};
pub use registry::TypeRegistry;

/// Capability marker for types that travel on the bus.
///
/// Usually implemented with `#[derive(Message)]`.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Wire-level type name written into the envelope discriminator.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// A deserialized message whose concrete type is only known at runtime.
///
/// Cheap to clone; the payload is shared.
#[derive(Clone)]
pub struct ReceivedMessage {
    type_name: Arc<str>,
    type_id: TypeId,
    body: Arc<dyn Any + Send + Sync>,
}

impl ReceivedMessage {
    /// Wrap a concrete message.
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            type_name: Arc::from(M::type_name()),
            type_id: TypeId::of::<M>(),
            body: Arc::new(message),
        }
    }

    /// The wire-level type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Borrow the payload as `M`, if that is its concrete type.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.body.downcast_ref::<M>()
    }

    pub fn is<M: Message>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }
}

impl fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
