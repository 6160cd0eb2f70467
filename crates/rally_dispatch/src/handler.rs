//! Type-erased streaming message handlers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ConnectionContext;
use crate::error::HandlerError;
use crate::message::{AnyMessage, Message};

/// A handler for inbound messages of one schema.
///
/// Handlers are stored behind this trait so the dispatch table can hold
/// handlers for unrelated message types side by side.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles an already decoded message.
    ///
    /// `message` is guaranteed to be the type registered for
    /// [`MessageHandler::schema_id`]; a mismatch is reported as an error.
    async fn handle(
        &self,
        ctx: &ConnectionContext,
        message: AnyMessage,
    ) -> Result<(), HandlerError>;

    fn schema_id(&self) -> &'static str;

    /// Human-readable name for logs.
    fn handler_name(&self) -> &str;
}

/// Adapts an async closure over a concrete message type into a
/// [`MessageHandler`].
///
/// # Examples
///
/// ```rust,ignore
/// let handler = TypedMessageHandler::new("chat.relay", |ctx, line: Arc<ChatLine>| async move {
///     ctx.emit(&[line.as_ref()]).await?;
///     Ok(())
/// });
/// ```
pub struct TypedMessageHandler<T, F> {
    handler: F,
    name: String,
    _phantom: PhantomData<fn(T)>,
}

impl<T, F, Fut> TypedMessageHandler<T, F>
where
    T: Message,
    F: Fn(ConnectionContext, Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            handler,
            name: name.into(),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler for TypedMessageHandler<T, F>
where
    T: Message,
    F: Fn(ConnectionContext, Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &ConnectionContext,
        message: AnyMessage,
    ) -> Result<(), HandlerError> {
        let message = message.downcast::<T>().map_err(|_| {
            HandlerError::failed(format!(
                "handler {} expected {} but received another type",
                self.name,
                T::SCHEMA_ID
            ))
        })?;
        (self.handler)(ctx.clone(), message).await
    }

    fn schema_id(&self) -> &'static str {
        T::SCHEMA_ID
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}
