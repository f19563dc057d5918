//! JSON message envelope.
//!
//! An [`Envelope`] is a JSON object whose `type` field is a string. The relay
//! reads `type` for dispatch and stamps `from_user_id` on everything it
//! forwards; every other field is payload and passes through untouched, in its
//! original order.
//!
//! # Invariants
//!
//! - `type` is always present and always a string. Constructors enforce it and
//!   the mutators refuse to touch it.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::{
    errors::{ProtocolError, Result},
    event::is_reserved,
};

/// Discriminator field present on every message.
pub const TYPE_FIELD: &str = "type";

/// Originator identity, injected by the relay on forwarded messages.
pub const FROM_USER_FIELD: &str = "from_user_id";

/// Optional recipient identity for directed signaling messages.
pub const TO_USER_FIELD: &str = "to_user_id";

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with only a `type` field.
    pub fn new(message_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(message_type.into()));
        Self { fields }
    }

    /// Decode any well-formed envelope, reserved types included.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidJson` if the bytes are not JSON
    /// - `ProtocolError::NotAnObject` if the JSON is not an object
    /// - `ProtocolError::MissingType` if `type` is absent or not a string
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decode a message received from a client.
    ///
    /// Same as [`Envelope::decode`], but also rejects the lifecycle types that
    /// only the relay may emit, so a client cannot forge `user_joined` or
    /// `user_left` for someone else.
    pub fn decode_inbound(bytes: &[u8]) -> Result<Self> {
        let envelope = Self::decode(bytes)?;
        if is_reserved(envelope.message_type()) {
            return Err(ProtocolError::ReservedType(envelope.message_type().to_string()));
        }
        Ok(envelope)
    }

    /// Wrap an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        if !fields.get(TYPE_FIELD).is_some_and(Value::is_string) {
            return Err(ProtocolError::MissingType);
        }

        Ok(Self { fields })
    }

    /// Value of the `type` discriminator.
    pub fn message_type(&self) -> &str {
        self.fields.get(TYPE_FIELD).and_then(Value::as_str).unwrap_or_default()
    }

    /// Field value. `None` if absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field value. `None` if absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Set a payload field, returning the previous value.
    ///
    /// The `type` field cannot be replaced this way; attempts are ignored and
    /// return `None`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        if key == TYPE_FIELD {
            return None;
        }
        self.fields.insert(key, value.into())
    }

    /// Builder-style [`Envelope::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Remove a payload field. The `type` field cannot be removed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if key == TYPE_FIELD {
            return None;
        }
        self.fields.shift_remove(key)
    }

    /// Stamp the originator identity, overwriting any client-supplied value.
    pub fn set_sender(&mut self, user_id: &str) {
        self.fields.insert(FROM_USER_FIELD.to_string(), Value::String(user_id.to_string()));
    }

    /// Originator identity. `None` if not stamped.
    pub fn sender(&self) -> Option<&str> {
        self.get_str(FROM_USER_FIELD)
    }

    /// Directed recipient (`to_user_id`). `None` for room-wide messages.
    pub fn recipient(&self) -> Option<&str> {
        self.get_str(TO_USER_FIELD)
    }

    /// All fields, in wire order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Serialize to JSON bytes.
    ///
    /// Callers fanning a message out encode once and share the `Bytes`, so
    /// every recipient sees identical bytes.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(&self.fields)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Consume into a plain JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}
