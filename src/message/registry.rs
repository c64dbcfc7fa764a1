//! Type registry - resolves wire type names to concrete message types.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;

use super::{Message, ReceivedMessage};
use crate::error::BusError;

type DecodeFn = fn(Value) -> Result<ReceivedMessage, BusError>;

#[derive(Clone)]
struct Registration {
    name: &'static str,
    type_id: TypeId,
    rust_type: &'static str,
    decode: DecodeFn,
}

enum Resolution {
    Unique(Registration),
    /// More than one concrete type claims the name.
    Conflict(Vec<&'static str>),
}

/// Registry of the message types a process can deserialize.
///
/// Types are registered explicitly at startup. The name index is built from
/// the registrations on first resolution and kept for the registry's
/// lifetime; it is never evicted, and reads after that are lock-free.
///
/// ## Example
///
/// ```
/// use conveyor::{Message, TypeRegistry};
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize, Message)]
/// #[message(name = "orders.created")]
/// struct OrderCreated {
///     order_id: String,
/// }
///
/// #[derive(Serialize, Deserialize, Message)]
/// #[message(name = "orders.shipped")]
/// struct OrderShipped {
///     order_id: String,
/// }
///
/// let registry = TypeRegistry::new()
///     .register::<OrderCreated>()
///     .register::<OrderShipped>();
///
/// let message = registry
///     .decode("orders.created", json!({ "order_id": "o1" }))
///     .unwrap();
/// assert_eq!(
///     message.downcast_ref::<OrderCreated>(),
///     Some(&OrderCreated { order_id: "o1".into() })
/// );
/// assert!(registry.decode("orders.cancelled", json!({})).is_err());
/// ```
#[derive(Default)]
pub struct TypeRegistry {
    registrations: Vec<Registration>,
    index: OnceLock<HashMap<&'static str, Resolution>>,
}

fn decode_as<M: Message>(value: Value) -> Result<ReceivedMessage, BusError> {
    // A fieldless envelope is either a unit struct or a struct whose fields
    // were all omitted.
    let fieldless = matches!(&value, Value::Object(fields) if fields.is_empty());
    let message: M = match serde_json::from_value(value) {
        Ok(message) => message,
        Err(err) if fieldless => serde_json::from_value(Value::Null).map_err(|_| err)?,
        Err(err) => return Err(err.into()),
    };
    Ok(ReceivedMessage::new(message))
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type. Registering the same type twice is a no-op.
    ///
    /// Uses builder pattern - returns `self` for chaining.
    pub fn register<M: Message>(mut self) -> Self {
        self.add::<M>();
        self
    }

    /// Register a message type in place.
    pub fn add<M: Message>(&mut self) {
        let type_id = TypeId::of::<M>();
        if self.registrations.iter().any(|r| r.type_id == type_id) {
            return;
        }
        self.registrations.push(Registration {
            name: M::type_name(),
            type_id,
            rust_type: std::any::type_name::<M>(),
            decode: decode_as::<M>,
        });
        // Registration after a resolution starts a fresh index.
        self.index = OnceLock::new();
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Whether a wire name is known (conflicting names count as known).
    pub fn contains(&self, name: &str) -> bool {
        self.index().contains_key(name)
    }

    /// Check every name resolves to exactly one type.
    ///
    /// Processors call this when they are built so duplicate names fail at
    /// startup rather than on the first unlucky message.
    pub fn validate(&self) -> Result<(), BusError> {
        let mut names: Vec<&&'static str> = self.index().keys().collect();
        names.sort();
        for name in names {
            self.check(name)?;
        }
        Ok(())
    }

    /// Decode a discriminator-stripped payload as the type registered under `name`.
    pub fn decode(&self, name: &str, payload: Value) -> Result<ReceivedMessage, BusError> {
        let registration = self.check(name)?;
        (registration.decode)(payload)
    }

    /// The Rust type path registered for `name`.
    pub fn rust_type(&self, name: &str) -> Result<&'static str, BusError> {
        self.check(name).map(|r| r.rust_type)
    }

    fn check(&self, name: &str) -> Result<&Registration, BusError> {
        match self.index().get(name) {
            Some(Resolution::Unique(registration)) => Ok(registration),
            Some(Resolution::Conflict(types)) => Err(BusError::Configuration(format!(
                "duplicate message type name '{}' claimed by {}",
                name,
                types.join(", ")
            ))),
            None => Err(BusError::Serialization(format!(
                "unresolvable type '{}'",
                name
            ))),
        }
    }

    fn index(&self) -> &HashMap<&'static str, Resolution> {
        self.index.get_or_init(|| {
            let mut claims: HashMap<&'static str, Vec<&Registration>> = HashMap::new();
            for registration in &self.registrations {
                claims.entry(registration.name).or_default().push(registration);
            }

            claims
                .into_iter()
                .map(|(name, claimants)| match claimants.as_slice() {
                    [only] => (name, Resolution::Unique((*only).clone())),
                    _ => {
                        let types: Vec<&'static str> =
                            claimants.iter().map(|r| r.rust_type).collect();
                        tracing::error!(
                            message_type = name,
                            types = ?types,
                            "message type name claimed by more than one type"
                        );
                        (name, Resolution::Conflict(types))
                    }
                })
                .collect()
        })
    }
}
