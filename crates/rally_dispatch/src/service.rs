//! Services: unary methods plus streaming handlers under one routing path.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use rally_kernel::{SystemConfig, SystemError};
use tracing::{error, info};

use crate::codec::Encoding;
use crate::context::ConnectionContext;
use crate::dispatch::DispatchTable;
use crate::error::{HandlerError, RegistryError, ServiceError, UnaryError};
use crate::handler::{MessageHandler, TypedMessageHandler};
use crate::message::{Decoder, Message};

/// A unit of application logic reachable by clients.
///
/// A service exposes unary methods at `<prefix>/<path>/<Method>` and may
/// declare streaming handlers for any message schema. Both are declared in
/// [`Service::routes`], which the registry calls exactly once.
///
/// # Examples
///
/// ```rust,ignore
/// impl Service for Lobby {
///     fn path(&self) -> &str {
///         "game.Lobby"
///     }
///
///     fn routes(self: Arc<Self>, routes: &mut ServiceRoutes) {
///         let lobby = Arc::clone(&self);
///         routes.unary("Join", move |req: JoinRequest| {
///             let lobby = Arc::clone(&lobby);
///             async move { lobby.join(req).await }
///         });
///         routes.handler("lobby.ready", move |ctx, ready: Arc<Ready>| async move {
///             ctx.emit(&[ready.as_ref()]).await?;
///             Ok(())
///         });
///     }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Globally unique routing path, e.g. `"rally.Ping"`.
    fn path(&self) -> &str;

    fn routes(self: Arc<Self>, routes: &mut ServiceRoutes);

    /// Called when the message router starts, with the config stored under
    /// this service's path in the `services` section.
    async fn setup(&self, _config: &SystemConfig) -> Result<(), SystemError> {
        Ok(())
    }

    async fn teardown(&self) -> Result<(), SystemError> {
        Ok(())
    }
}

/// A type-erased unary method.
#[async_trait]
pub trait UnaryMethod: Send + Sync {
    /// Decodes `body` with `encoding`, runs the method and encodes the
    /// response with the same encoding.
    async fn invoke(&self, encoding: Encoding, body: &[u8]) -> Result<Vec<u8>, UnaryError>;

    fn request_schema(&self) -> &'static str;

    fn response_schema(&self) -> &'static str;
}

struct TypedUnary<Req, Resp, F> {
    method: F,
    _phantom: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<Req, Resp, F, Fut> UnaryMethod for TypedUnary<Req, Resp, F>
where
    Req: Message,
    Resp: Message,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
{
    async fn invoke(&self, encoding: Encoding, body: &[u8]) -> Result<Vec<u8>, UnaryError> {
        let request: Req = encoding.decode_message(body).map_err(UnaryError::Decode)?;
        let response = (self.method)(request).await?;
        encoding
            .encode_message(&response)
            .map_err(UnaryError::Encode)
    }

    fn request_schema(&self) -> &'static str {
        Req::SCHEMA_ID
    }

    fn response_schema(&self) -> &'static str {
        Resp::SCHEMA_ID
    }
}

/// A unary call as seen by [`UnaryHooks`].
#[derive(Debug, Clone, Copy)]
pub struct UnaryCall<'a> {
    pub service: &'a str,
    pub method: &'a str,
    pub encoding: Encoding,
}

/// Callbacks run around every unary call of one service.
///
/// `request_received` runs before the method is resolved. Exactly one of
/// `response_sent` or `error` follows it.
pub trait UnaryHooks: Send + Sync {
    fn request_received(&self, _call: &UnaryCall<'_>) {}

    fn response_sent(&self, _call: &UnaryCall<'_>) {}

    fn error(&self, _call: &UnaryCall<'_>, _error: &UnaryError) {}
}

/// Collects the methods and handlers a service declares.
pub struct ServiceRoutes {
    path: String,
    methods: BTreeMap<String, Arc<dyn UnaryMethod>>,
    handlers: Vec<(Decoder, Arc<dyn MessageHandler>)>,
    hooks: Option<Arc<dyn UnaryHooks>>,
    error: Option<RegistryError>,
}

impl ServiceRoutes {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            methods: BTreeMap::new(),
            handlers: Vec::new(),
            hooks: None,
            error: None,
        }
    }

    /// Installs hooks for this service's unary calls, replacing any set
    /// earlier.
    pub fn hooks<H: UnaryHooks + 'static>(&mut self, hooks: H) -> &mut Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Declares a unary method named `method`.
    pub fn unary<Req, Resp, F, Fut>(&mut self, method: &str, f: F) -> &mut Self
    where
        Req: Message,
        Resp: Message,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
    {
        let typed: Arc<dyn UnaryMethod> = Arc::new(TypedUnary {
            method: f,
            _phantom: PhantomData,
        });
        if self.methods.insert(method.to_string(), typed).is_some() && self.error.is_none() {
            self.error = Some(RegistryError::DuplicateMethod {
                path: self.path.clone(),
                method: method.to_string(),
            });
        }
        self
    }

    /// Declares a streaming handler for messages of type `T`.
    pub fn handler<T, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        T: Message,
        F: Fn(ConnectionContext, Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let name = format!("{}::{}", self.path, name);
        self.handlers.push((
            Decoder::of::<T>(),
            Arc::new(TypedMessageHandler::new(name, f)),
        ));
        self
    }
}

/// A registered service and its unary methods.
pub struct ServiceEntry {
    path: String,
    service: Arc<dyn Service>,
    methods: BTreeMap<String, Arc<dyn UnaryMethod>>,
    hooks: Option<Arc<dyn UnaryHooks>>,
}

impl ServiceEntry {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn method(&self, name: &str) -> Option<Arc<dyn UnaryMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Runs the unary method `method`, surrounded by the service's hooks.
    pub async fn call(
        &self,
        method: &str,
        encoding: Encoding,
        body: &[u8],
    ) -> Result<Vec<u8>, UnaryError> {
        let call = UnaryCall {
            service: &self.path,
            method,
            encoding,
        };
        if let Some(hooks) = &self.hooks {
            hooks.request_received(&call);
        }

        let result = match self.methods.get(method) {
            Some(unary) => unary.invoke(encoding, body).await,
            None => Err(UnaryError::UnknownMethod {
                path: self.path.clone(),
                method: method.to_string(),
            }),
        };

        if let Some(hooks) = &self.hooks {
            match &result {
                Ok(_) => hooks.response_sent(&call),
                Err(e) => hooks.error(&call, e),
            }
        }
        result
    }
}

/// Every service known to the process, plus the dispatch table harvested
/// from their streaming handlers.
///
/// Assembled during bootstrap and then moved into the message router, after
/// which it is only read.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceEntry>,
    table: DispatchTable,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Service>(&mut self, service: S) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(service))
    }

    /// Registers a service under its path and harvests its handlers.
    ///
    /// Registering a second service at an existing path fails with the fatal
    /// [`RegistryError::DuplicatePath`].
    pub fn register_arc(&mut self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        let path = service.path().to_string();
        if self.service(&path).is_some() {
            error!("❌ Service path {} is already registered", path);
            return Err(RegistryError::DuplicatePath(path));
        }

        let mut routes = ServiceRoutes::new(&path);
        Arc::clone(&service).routes(&mut routes);
        if let Some(err) = routes.error {
            return Err(err);
        }

        let mut bound: Vec<&Decoder> = Vec::new();
        for (decoder, _) in &routes.handlers {
            self.table.check(decoder)?;
            if let Some(existing) = bound
                .iter()
                .find(|d| d.schema() == decoder.schema() && d.type_id() != decoder.type_id())
            {
                return Err(RegistryError::DuplicateSchema {
                    schema: decoder.schema().to_string(),
                    existing: existing.type_name(),
                    conflicting: decoder.type_name(),
                });
            }
            bound.push(decoder);
        }

        let handler_count = routes.handlers.len();
        for (decoder, handler) in routes.handlers {
            self.table.add(decoder, handler)?;
        }

        info!(
            "🧩 Registered service {} ({} methods, {} handlers)",
            path,
            routes.methods.len(),
            handler_count
        );
        self.services.push(ServiceEntry {
            path,
            service,
            methods: routes.methods,
            hooks: routes.hooks,
        });
        Ok(())
    }

    pub fn service(&self, path: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|entry| entry.path == path)
    }

    /// Services in registration order.
    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    pub fn paths(&self) -> Vec<&str> {
        self.services.iter().map(|entry| entry.path.as_str()).collect()
    }

    pub fn method(&self, path: &str, method: &str) -> Option<Arc<dyn UnaryMethod>> {
        self.service(path)?.method(method)
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
