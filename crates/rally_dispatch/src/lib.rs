//! # Rally Dispatch
//!
//! Message routing for persistent client connections.
//!
//! Clients and servers exchange *envelopes*: ordered batches of typed
//! messages, each tagged with a stable schema id. Inbound envelopes are
//! decoded by the [`MessageRouter`] (the `services` subsystem), and every
//! message is handed to all handlers registered for its schema. Outbound
//! messages are packed into a single envelope per emit call and written as
//! one frame.
//!
//! Handlers are declared by [`Service`]s. Services also expose unary
//! request/response methods that transports mount over HTTP.
//!
//! ## Key properties
//!
//! * A malformed envelope drops the whole frame; a malformed payload only
//!   drops itself.
//! * Messages of an unknown schema are logged and ignored.
//! * Handlers for a schema run in registration order. A failing or
//!   panicking handler does not prevent the others from running.

pub mod codec;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod message;
pub mod router;
pub mod service;

pub use codec::{Encoding, Envelope, Payload, PayloadBody, BINARY_CONTENT_TYPE, JSON_CONTENT_TYPE};
pub use context::{
    emit_binary_messages, emit_json_messages, emit_messages, pack_frame, ChannelSink,
    ConnectionContext, ConnectionId, Frame, FrameSink,
};
pub use dispatch::{DispatchOutcome, DispatchTable};
pub use error::{CodecError, EmitError, HandlerError, RegistryError, ServiceError, UnaryError};
pub use handler::{MessageHandler, TypedMessageHandler};
pub use message::{AnyMessage, Decoder, DynMessage, Message};
pub use router::{DispatchStats, DispatchSummary, MessageRouter, SERVICES_SYSTEM};
pub use service::{
    Service, ServiceEntry, ServiceRegistry, ServiceRoutes, UnaryCall, UnaryHooks, UnaryMethod,
};
