//! Wire encodings and the batching envelope.
//!
//! Every frame on a streaming connection carries exactly one envelope: an
//! ordered list of `(schema id, payload)` pairs. Two encodings exist:
//!
//! * **JSON**: `{"messages":[{"type":"pkg.Name","value":{...}}]}`, sent as
//!   text frames.
//! * **Binary**: the bincode encoding of the same structure, where each
//!   `value` is itself the bincode encoding of the message. Sent as binary
//!   frames.
//!
//! Decoding an envelope only parses its outer structure; payloads stay
//! opaque until the dispatcher resolves their schema, so one bad payload
//! never spoils the rest of the batch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::DynMessage;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const BINARY_CONTENT_TYPE: &str = "application/x-bincode";

/// Encoding negotiated for a connection or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Json,
    Binary,
}

impl Encoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Json => JSON_CONTENT_TYPE,
            Encoding::Binary => BINARY_CONTENT_TYPE,
        }
    }

    /// Resolves a `Content-Type` header value, ignoring parameters such as
    /// `; charset=utf-8`. An empty value selects JSON.
    pub fn from_content_type(content_type: &str) -> Result<Self, CodecError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "" | JSON_CONTENT_TYPE => Ok(Encoding::Json),
            BINARY_CONTENT_TYPE | "application/octet-stream" => Ok(Encoding::Binary),
            _ => Err(CodecError::UnsupportedContentType(content_type.to_string())),
        }
    }

    /// Encodes a bare message (no envelope), as used by unary calls.
    pub fn encode_message(self, message: &dyn DynMessage) -> Result<Vec<u8>, CodecError> {
        match self {
            Encoding::Json => Ok(serde_json::to_vec(&message.to_json_value()?)?),
            Encoding::Binary => message.to_binary(),
        }
    }

    /// Decodes a bare message (no envelope), as used by unary calls.
    pub fn decode_message<T: crate::Message>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(bytes)?),
            Encoding::Binary => Ok(bincode::deserialize(bytes)?),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Json => f.write_str("json"),
            Encoding::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "binary" | "bincode" => Ok(Encoding::Binary),
            _ => Encoding::from_content_type(s),
        }
    }
}

/// One undecoded payload inside an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub schema: String,
    pub body: PayloadBody,
}

impl Payload {
    fn mismatch(&self, expected: Encoding) -> CodecError {
        CodecError::EncodingMismatch {
            schema: self.schema.clone(),
            expected,
        }
    }
}

/// An ordered batch of type-tagged payloads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    pub payloads: Vec<Payload>,
}

#[derive(Serialize, Deserialize)]
struct JsonEnvelope {
    #[serde(default)]
    messages: Vec<JsonPayload>,
}

#[derive(Serialize, Deserialize)]
struct JsonPayload {
    #[serde(rename = "type")]
    schema: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
    messages: Vec<BinaryPayload>,
}

#[derive(Serialize, Deserialize)]
struct BinaryPayload {
    schema: String,
    value: Vec<u8>,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Packs messages in order using `encoding` for each payload body.
    pub fn pack(encoding: Encoding, messages: &[&dyn DynMessage]) -> Result<Self, CodecError> {
        let payloads = messages
            .iter()
            .map(|message| {
                let body = match encoding {
                    Encoding::Json => PayloadBody::Json(message.to_json_value()?),
                    Encoding::Binary => PayloadBody::Binary(message.to_binary()?),
                };
                Ok(Payload {
                    schema: message.schema_id().to_string(),
                    body,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;
        Ok(Self { payloads })
    }

    /// Parses the outer structure of a frame.
    pub fn decode(encoding: Encoding, bytes: &[u8]) -> Result<Self, CodecError> {
        let payloads = match encoding {
            Encoding::Json => {
                let envelope: JsonEnvelope = serde_json::from_slice(bytes)?;
                envelope
                    .messages
                    .into_iter()
                    .map(|p| Payload {
                        schema: p.schema,
                        body: PayloadBody::Json(p.value),
                    })
                    .collect()
            }
            Encoding::Binary => {
                let envelope: BinaryEnvelope = bincode::deserialize(bytes)?;
                envelope
                    .messages
                    .into_iter()
                    .map(|p| Payload {
                        schema: p.schema,
                        body: PayloadBody::Binary(p.value),
                    })
                    .collect()
            }
        };
        Ok(Self { payloads })
    }

    /// Serializes the envelope.
    ///
    /// Payload bodies must already be in `encoding`; a body in the other
    /// encoding fails with [`CodecError::EncodingMismatch`].
    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
        match encoding {
            Encoding::Json => {
                let messages = self
                    .payloads
                    .iter()
                    .map(|p| {
                        let PayloadBody::Json(value) = &p.body else {
                            return Err(p.mismatch(encoding));
                        };
                        Ok(JsonPayload {
                            schema: p.schema.clone(),
                            value: value.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, CodecError>>()?;
                Ok(serde_json::to_vec(&JsonEnvelope { messages })?)
            }
            Encoding::Binary => {
                let messages = self
                    .payloads
                    .iter()
                    .map(|p| {
                        let PayloadBody::Binary(bytes) = &p.body else {
                            return Err(p.mismatch(encoding));
                        };
                        Ok(BinaryPayload {
                            schema: p.schema.clone(),
                            value: bytes.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, CodecError>>()?;
                Ok(bincode::serialize(&BinaryEnvelope { messages })?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchTable;
    use crate::message::Message;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Message for Position {
        const SCHEMA_ID: &'static str = "test.Position";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chat {
        text: String,
    }

    impl Message for Chat {
        const SCHEMA_ID: &'static str = "test.Chat";
    }

    #[test]
    fn test_content_type_negotiation() {
        assert_eq!(Encoding::from_content_type("").unwrap(), Encoding::Json);
        assert_eq!(
            Encoding::from_content_type("application/json; charset=utf-8").unwrap(),
            Encoding::Json
        );
        assert_eq!(
            Encoding::from_content_type("application/x-bincode").unwrap(),
            Encoding::Binary
        );
        assert!(matches!(
            Encoding::from_content_type("text/plain"),
            Err(CodecError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("Binary".parse::<Encoding>().unwrap(), Encoding::Binary);
        assert!("xml".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_json_envelope_layout() {
        let position = Position { x: 1.0, y: 2.5 };
        let chat = Chat { text: "gg".into() };
        let envelope = Envelope::pack(Encoding::Json, &[&position, &chat]).unwrap();
        let bytes = envelope.encode(Encoding::Json).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            parsed,
            json!({
                "messages": [
                    {"type": "test.Position", "value": {"x": 1.0, "y": 2.5}},
                    {"type": "test.Chat", "value": {"text": "gg"}}
                ]
            })
        );
    }

    #[test]
    fn test_json_envelope_decode_keeps_order_and_fields() {
        let raw = br#"{"messages":[
            {"type":"test.Chat","value":{"text":"first"}},
            {"type":"test.Position","value":{"x":3,"y":4}}
        ]}"#;
        let envelope = Envelope::decode(Encoding::Json, raw).unwrap();

        assert_eq!(envelope.len(), 2);
        assert_eq!(envelope.payloads[0].schema, "test.Chat");
        assert_eq!(
            envelope.payloads[1].body,
            PayloadBody::Json(json!({"x": 3, "y": 4}))
        );
    }

    #[test]
    fn test_binary_envelope_round_trip() {
        let position = Position { x: -1.0, y: 0.5 };
        let envelope = Envelope::pack(Encoding::Binary, &[&position]).unwrap();
        let bytes = envelope.encode(Encoding::Binary).unwrap();

        let decoded = Envelope::decode(Encoding::Binary, &bytes).unwrap();
        assert_eq!(decoded, envelope);
        let PayloadBody::Binary(body) = &decoded.payloads[0].body else {
            panic!("expected binary body");
        };
        let restored: Position = bincode::deserialize(body).unwrap();
        assert_eq!(restored, position);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        x: f32,
        y: f32,
        id: u64,
    }

    impl Message for Snapshot {
        const SCHEMA_ID: &'static str = "test.Snapshot";
    }

    #[test]
    fn test_json_envelope_restores_typed_message() {
        let mut table = DispatchTable::new();
        table
            .on::<Snapshot, _, _>("noop", |_ctx, _msg| async { Ok(()) })
            .unwrap();

        let snapshot = Snapshot {
            x: 0.1,
            y: -3.5,
            id: u64::MAX,
        };
        let bytes = Envelope::pack(Encoding::Json, &[&snapshot])
            .unwrap()
            .encode(Encoding::Json)
            .unwrap();
        let mut envelope = Envelope::decode(Encoding::Json, &bytes).unwrap();
        assert_eq!(envelope.len(), 1);

        let decoded = table.decode(envelope.payloads.remove(0)).unwrap();
        let restored = decoded.downcast::<Snapshot>().unwrap();
        assert_eq!(*restored, snapshot);
    }

    #[test]
    fn test_encode_rejects_body_in_other_encoding() {
        let chat = Chat { text: "hi".into() };
        let json = Envelope::pack(Encoding::Json, &[&chat]).unwrap();
        let binary = Envelope::pack(Encoding::Binary, &[&chat]).unwrap();

        assert!(matches!(
            json.encode(Encoding::Binary),
            Err(CodecError::EncodingMismatch { ref schema, expected: Encoding::Binary })
                if schema == "test.Chat"
        ));
        assert!(matches!(
            binary.encode(Encoding::Json),
            Err(CodecError::EncodingMismatch { expected: Encoding::Json, .. })
        ));
    }

    #[test]
    fn test_malformed_envelope_is_rejected() {
        assert!(Envelope::decode(Encoding::Json, b"{\"messages\": 7}").is_err());
        assert!(Envelope::decode(Encoding::Json, b"not json").is_err());
        assert!(Envelope::decode(Encoding::Binary, &[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_empty_envelope() {
        let envelope = Envelope::decode(Encoding::Json, b"{}").unwrap();
        assert!(envelope.is_empty());
    }

    #[test]
    fn test_bare_message_codec() {
        let chat = Chat { text: "hi".into() };
        for encoding in [Encoding::Json, Encoding::Binary] {
            let bytes = encoding.encode_message(&chat).unwrap();
            let decoded: Chat = encoding.decode_message(&bytes).unwrap();
            assert_eq!(decoded, chat);
        }
    }
}
