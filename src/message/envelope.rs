//! Envelope codec - `{ "$type": <name>, ...fields }`.
//!
//! The discriminator is always the first key of the envelope. Decoding
//! strips it, resolves the name through the [`TypeRegistry`] and hands the
//! remaining fields to the concrete type's deserializer.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{Message, ReceivedMessage, TypeRegistry};
use crate::error::BusError;

/// Name of the discriminator field.
pub const DISCRIMINATOR: &str = "$type";

/// Options for writing envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeOptions {
    /// Keep fields whose value is `null` instead of omitting them.
    pub include_nulls: bool,
}

/// Serializes messages into envelopes and resolves envelopes back into
/// messages.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<TypeRegistry>,
    options: EnvelopeOptions,
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            options: EnvelopeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EnvelopeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn options(&self) -> EnvelopeOptions {
        self.options
    }

    /// Write `message` as an envelope string.
    pub fn encode<M: Message>(&self, message: &M) -> Result<String, BusError> {
        encode(message, self.options)
    }

    /// Read an envelope string into a message.
    pub fn decode(&self, payload: &str) -> Result<ReceivedMessage, BusError> {
        let value: Value = serde_json::from_str(payload)?;
        self.decode_value(value)
    }

    /// Read an envelope from raw bytes.
    pub fn decode_slice(&self, payload: &[u8]) -> Result<ReceivedMessage, BusError> {
        let value: Value = serde_json::from_slice(payload)?;
        self.decode_value(value)
    }

    pub fn decode_value(&self, value: Value) -> Result<ReceivedMessage, BusError> {
        let (name, fields) = split(value)?;
        self.registry.decode(&name, Value::Object(fields))
    }
}

/// Build the envelope value for `message`.
pub(crate) fn to_envelope<M: Message>(
    message: &M,
    options: EnvelopeOptions,
) -> Result<Value, BusError> {
    let fields = match serde_json::to_value(message)? {
        Value::Object(fields) => fields,
        // Unit structs carry no fields.
        Value::Null => Map::new(),
        other => {
            return Err(BusError::Serialization(format!(
                "message '{}' must serialize to a JSON object, got {}",
                M::type_name(),
                kind(&other)
            )))
        }
    };

    if fields.contains_key(DISCRIMINATOR) {
        return Err(BusError::Serialization(format!(
            "message '{}' has a field named '{}'",
            M::type_name(),
            DISCRIMINATOR
        )));
    }

    let mut envelope = Map::with_capacity(fields.len() + 1);
    envelope.insert(
        DISCRIMINATOR.to_string(),
        Value::String(M::type_name().to_string()),
    );
    for (key, value) in fields {
        if value.is_null() && !options.include_nulls {
            continue;
        }
        envelope.insert(key, value);
    }
    Ok(Value::Object(envelope))
}

/// Serialize `message` into an envelope string.
pub(crate) fn encode<M: Message>(message: &M, options: EnvelopeOptions) -> Result<String, BusError> {
    let envelope = to_envelope(message, options)?;
    Ok(serde_json::to_string(&envelope)?)
}

fn split(value: Value) -> Result<(String, Map<String, Value>), BusError> {
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(BusError::Serialization(format!(
                "envelope must be a JSON object, got {}",
                kind(&other)
            )))
        }
    };

    match fields.shift_remove(DISCRIMINATOR) {
        Some(Value::String(name)) => Ok((name, fields)),
        Some(other) => Err(BusError::Serialization(format!(
            "discriminator must be a string, got {}",
            kind(&other)
        ))),
        None => Err(BusError::Serialization("missing discriminator".to_string())),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
