//! Typed messages and their type-erased forms.

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// A message that can travel inside an envelope.
///
/// `SCHEMA_ID` is the stable type tag written next to every payload on the
/// wire and used to route inbound payloads to their handlers. It must be
/// unique across every message type the process knows about.
///
/// # Examples
///
/// ```rust
/// use rally_dispatch::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct ChatLine {
///     channel: String,
///     text: String,
/// }
///
/// impl Message for ChatLine {
///     const SCHEMA_ID: &'static str = "chat.ChatLine";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    const SCHEMA_ID: &'static str;
}

/// A decoded inbound message whose concrete type is only known to the
/// handlers registered for its schema.
pub type AnyMessage = Arc<dyn Any + Send + Sync>;

/// Object-safe view of an outbound [`Message`].
///
/// Lets callers emit a heterogeneous batch in one frame:
/// `ctx.emit(&[&position, &chat_line])`.
pub trait DynMessage: Send + Sync {
    fn schema_id(&self) -> &'static str;
    fn to_json_value(&self) -> Result<serde_json::Value, CodecError>;
    fn to_binary(&self) -> Result<Vec<u8>, CodecError>;
}

impl<T: Message> DynMessage for T {
    fn schema_id(&self) -> &'static str {
        T::SCHEMA_ID
    }

    fn to_json_value(&self) -> Result<serde_json::Value, CodecError> {
        Ok(serde_json::to_value(self)?)
    }

    fn to_binary(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }
}

/// Decodes payload bodies of one schema into [`AnyMessage`]s.
#[derive(Clone, Copy)]
pub struct Decoder {
    schema: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    json: fn(serde_json::Value) -> Result<AnyMessage, CodecError>,
    binary: fn(&[u8]) -> Result<AnyMessage, CodecError>,
}

impl Decoder {
    pub fn of<T: Message>() -> Self {
        Self {
            schema: T::SCHEMA_ID,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            json: decode_json::<T>,
            binary: decode_binary::<T>,
        }
    }

    pub fn schema(&self) -> &'static str {
        self.schema
    }

    /// Rust type the payloads decode into.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn decode_json(&self, value: serde_json::Value) -> Result<AnyMessage, CodecError> {
        (self.json)(value)
    }

    pub fn decode_binary(&self, bytes: &[u8]) -> Result<AnyMessage, CodecError> {
        (self.binary)(bytes)
    }
}

impl Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("schema", &self.schema)
            .field("type", &self.type_name)
            .finish()
    }
}

fn decode_json<T: Message>(value: serde_json::Value) -> Result<AnyMessage, CodecError> {
    let message: T = serde_json::from_value(value)?;
    Ok(Arc::new(message))
}

fn decode_binary<T: Message>(bytes: &[u8]) -> Result<AnyMessage, CodecError> {
    let message: T = bincode::deserialize(bytes)?;
    Ok(Arc::new(message))
}
