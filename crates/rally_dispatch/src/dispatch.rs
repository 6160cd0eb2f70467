//! Schema-keyed dispatch table with per-handler failure isolation.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::codec::{Payload, PayloadBody};
use crate::context::ConnectionContext;
use crate::error::{CodecError, HandlerError, RegistryError};
use crate::handler::{MessageHandler, TypedMessageHandler};
use crate::message::{AnyMessage, Decoder, Message};

/// Result of dispatching a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the message's schema.
    Unhandled,
    /// Every handler for the schema ran; `failed` of them returned an error
    /// or panicked.
    Delivered { handlers: usize, failed: usize },
}

/// Maps schema ids to decoders and to the ordered handlers for that schema.
///
/// Built once while services register and read-only afterwards. Every
/// handler registered for a schema receives every message of that schema,
/// in registration order.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<&'static str, Vec<Arc<dyn MessageHandler>>>,
    decoders: HashMap<&'static str, Decoder>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when the decoder's schema is already bound to another type.
    pub fn check(&self, decoder: &Decoder) -> Result<(), RegistryError> {
        match self.decoders.get(decoder.schema()) {
            Some(existing) if existing.type_id() != decoder.type_id() => {
                Err(RegistryError::DuplicateSchema {
                    schema: decoder.schema().to_string(),
                    existing: existing.type_name(),
                    conflicting: decoder.type_name(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Appends `handler` to the handlers for the decoder's schema.
    ///
    /// Each schema id decodes into exactly one Rust type; registering a
    /// handler for a different type under a bound schema is rejected.
    pub fn add(
        &mut self,
        decoder: Decoder,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistryError> {
        self.check(&decoder)?;
        let schema = decoder.schema();
        self.decoders.entry(schema).or_insert(decoder);
        self.handlers.entry(schema).or_default().push(handler);
        debug!("Registered handler for {}", schema);
        Ok(())
    }

    /// Registers an async closure for messages of type `T`.
    pub fn on<T, F, Fut>(&mut self, name: &str, handler: F) -> Result<(), RegistryError>
    where
        T: Message,
        F: Fn(ConnectionContext, Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.add(
            Decoder::of::<T>(),
            Arc::new(TypedMessageHandler::new(name, handler)),
        )
    }

    pub fn handlers(&self, schema: &str) -> &[Arc<dyn MessageHandler>] {
        self.handlers.get(schema).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_handlers(&self, schema: &str) -> bool {
        !self.handlers(schema).is_empty()
    }

    pub fn schemas(&self) -> Vec<&'static str> {
        let mut schemas: Vec<_> = self.handlers.keys().copied().collect();
        schemas.sort_unstable();
        schemas
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Decodes one payload using the decoder registered for its schema.
    pub fn decode(&self, payload: Payload) -> Result<AnyMessage, CodecError> {
        let decoder = self
            .decoders
            .get(payload.schema.as_str())
            .ok_or_else(|| CodecError::UnknownSchema(payload.schema.clone()))?;

        match payload.body {
            PayloadBody::Json(value) => decoder.decode_json(value),
            PayloadBody::Binary(bytes) => decoder.decode_binary(&bytes),
        }
    }

    /// Runs every handler registered for `schema`, one after another.
    ///
    /// A handler that returns an error or panics is logged and counted;
    /// the remaining handlers still run.
    pub async fn dispatch(
        &self,
        ctx: &ConnectionContext,
        schema: &str,
        message: AnyMessage,
    ) -> DispatchOutcome {
        let handlers = self.handlers(schema);
        if handlers.is_empty() {
            warn!(connection = ctx.id(), "⚠️ No handlers for message type {}", schema);
            return DispatchOutcome::Unhandled;
        }

        let mut failed = 0;
        for handler in handlers {
            let call = AssertUnwindSafe(handler.handle(ctx, Arc::clone(&message)));
            let result = match call.catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
            };

            if let Err(e) = result {
                failed += 1;
                error!(
                    connection = ctx.id(),
                    "❌ Handler {} failed on {}: {}",
                    handler.handler_name(),
                    schema,
                    e
                );
            }
        }

        DispatchOutcome::Delivered {
            handlers: handlers.len(),
            failed,
        }
    }

    /// Dispatches an in-process message without going through a codec.
    pub async fn dispatch_message<T: Message>(
        &self,
        ctx: &ConnectionContext,
        message: T,
    ) -> DispatchOutcome {
        self.dispatch(ctx, T::SCHEMA_ID, Arc::new(message)).await
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
