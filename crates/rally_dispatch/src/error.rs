//! Error types for encoding, dispatch, emission and services.

/// Failure to encode or decode an envelope or a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),
    #[error("no decoder registered for message type `{0}`")]
    UnknownSchema(String),
    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
    #[error("payload `{schema}` is not {expected}-encoded")]
    EncodingMismatch {
        schema: String,
        expected: crate::codec::Encoding,
    },
}

/// Failure to deliver an outbound frame.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to pack messages: {0}")]
    Codec(#[from] CodecError),
    #[error("connection is closed")]
    Closed,
}

/// Error returned by a streaming message handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Error returned by a unary service method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure of a unary invocation as seen by a transport.
#[derive(Debug, thiserror::Error)]
pub enum UnaryError {
    #[error("unknown method {path}/{method}")]
    UnknownMethod { path: String, method: String },
    #[error("malformed request: {0}")]
    Decode(#[source] CodecError),
    #[error("failed to encode response: {0}")]
    Encode(#[source] CodecError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Programmer errors while assembling the service registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("service path `{0}` is already registered")]
    DuplicatePath(String),
    #[error("method `{method}` is declared twice on service `{path}`")]
    DuplicateMethod { path: String, method: String },
    #[error("schema `{schema}` is bound to `{existing}`, cannot bind it to `{conflicting}`")]
    DuplicateSchema {
        schema: String,
        existing: &'static str,
        conflicting: &'static str,
    },
}

impl RegistryError {
    pub fn is_fatal(&self) -> bool {
        true
    }
}
