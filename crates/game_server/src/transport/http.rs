use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use dashmap::DashMap;
use prometheus::{Gauge, Histogram};
use rally_dispatch::{ConnectionId, MessageRouter};
use rally_kernel::{ConfigError, Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{unary, websocket};
use crate::systems::{MetricsSystem, METRICS, SERVICES};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Address to bind, e.g. `127.0.0.1:8080`. Port 0 picks a free port.
    pub listen: String,
    /// Mount point for service routes.
    pub prefix: String,
    /// WebSocket endpoint, relative to `prefix`.
    pub messages: String,
    /// Seconds to wait for the server to stop before aborting it.
    pub shutdown_timeout: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            prefix: "/".to_string(),
            messages: "/messages".to_string(),
            shutdown_timeout: 10,
        }
    }
}

impl HttpSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let settings: HttpSettings = config.deserialize()?;
        if settings.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid listen address '{}'",
                settings.listen
            )));
        }
        Ok(settings)
    }

    pub fn messages_route(&self) -> String {
        join_path(&self.prefix, &self.messages)
    }

    pub fn unary_route(&self) -> String {
        join_path(&self.prefix, "/:service/:method")
    }
}

/// Joins URL path segments, normalizing slashes. The result always starts
/// with `/` and never ends with one (unless it is the root).
pub fn join_path(prefix: &str, path: &str) -> String {
    let joined = format!(
        "/{}/{}",
        prefix.trim_matches('/'),
        path.trim_matches('/')
    );
    let mut normalized = String::with_capacity(joined.len());
    for segment in joined.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

const UNARY_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Collectors the transport keeps on the metrics registry while it runs.
#[derive(Clone)]
pub struct TransportMetrics {
    pub connections: Gauge,
    pub unary_duration: Histogram,
}

impl TransportMetrics {
    fn register(metrics: &MetricsSystem) -> Result<Self, prometheus::Error> {
        let connections =
            metrics.register_gauge("websocket_connections", "Open WebSocket connections")?;
        let unary_duration = match metrics.register_histogram(
            "unary_request_duration_seconds",
            "Time spent serving unary calls",
            UNARY_BUCKETS.to_vec(),
        ) {
            Ok(histogram) => histogram,
            Err(e) => {
                let _ = metrics.registry().unregister(Box::new(connections));
                return Err(e);
            }
        };
        Ok(Self {
            connections,
            unary_duration,
        })
    }

    fn unregister(&self, metrics: &MetricsSystem) {
        let _ = metrics.registry().unregister(Box::new(self.connections.clone()));
        let _ = metrics.registry().unregister(Box::new(self.unary_duration.clone()));
    }
}

/// Shared state behind every route.
pub struct TransportState {
    pub router: Arc<MessageRouter>,
    pub metrics: Option<Arc<MetricsSystem>>,
    pub collectors: Option<TransportMetrics>,
    pub connections: DashMap<ConnectionId, Option<SocketAddr>>,
    pub(super) next_connection_id: AtomicU64,
    pub(super) shutdown: broadcast::Sender<()>,
    closing: AtomicBool,
}

impl TransportState {
    pub fn new(router: Arc<MessageRouter>, metrics: Option<Arc<MetricsSystem>>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let collectors = metrics
            .as_deref()
            .and_then(|metrics| match TransportMetrics::register(metrics) {
                Ok(collectors) => Some(collectors),
                Err(e) => {
                    warn!("⚠️ Transport metrics unavailable: {}", e);
                    None
                }
            });
        Self {
            router,
            metrics,
            collectors,
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            shutdown,
            closing: AtomicBool::new(false),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Asks every open WebSocket to close. Connections that finish their
    /// upgrade afterwards are closed as soon as they start.
    pub fn close_connections(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn release_metrics(&self) {
        if let (Some(metrics), Some(collectors)) = (&self.metrics, &self.collectors) {
            collectors.unregister(metrics);
        }
    }
}

/// Builds the axum application for `settings`.
pub async fn build_app(settings: &HttpSettings, state: Arc<TransportState>) -> Router {
    let mut app = Router::new()
        .route(&settings.unary_route(), post(unary::invoke))
        .route(&settings.messages_route(), get(websocket::upgrade));

    if let Some(metrics) = &state.metrics {
        app = app.route(&metrics.path().await, get(render_metrics));
    }

    app.with_state(state)
}

async fn render_metrics(
    axum::extract::State(state): axum::extract::State<Arc<TransportState>>,
) -> axum::response::Response {
    let Some(metrics) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.render() {
        Ok(body) => ([(CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => {
            error!("❌ Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

struct Running {
    state: Arc<TransportState>,
    server: JoinHandle<std::io::Result<()>>,
    shutdown: tokio::sync::oneshot::Sender<()>,
    timeout: Duration,
}

/// The `http` subsystem.
#[derive(Default)]
pub struct HttpTransport {
    running: Mutex<Option<Running>>,
    local_addr: RwLock<Option<SocketAddr>>,
    status: StatusFlag,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound address while the transport is up.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub async fn connection_count(&self) -> usize {
        self.running
            .lock()
            .await
            .as_ref()
            .map_or(0, |running| running.state.connection_count())
    }
}

#[async_trait]
impl Subsystem for HttpTransport {
    async fn setup(&self, kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError> {
        let settings = HttpSettings::from_config(config)?;

        let router = kernel.lookup::<MessageRouter>(SERVICES)?;
        if !router.status().is_up() {
            return Err(SystemError::DependencyDown(SERVICES.to_string()));
        }

        let metrics = if kernel.contains(METRICS) {
            Some(kernel.lookup::<MetricsSystem>(METRICS)?).filter(|m| m.status().is_up())
        } else {
            None
        };

        let state = Arc::new(TransportState::new(router, metrics));
        let app = build_app(&settings, Arc::clone(&state)).await;

        let listener = TcpListener::bind(&settings.listen)
            .await
            .map_err(|e| SystemError::other(format!("failed to bind {}", settings.listen), e))?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        });

        *self.local_addr.write().await = Some(local_addr);
        *self.running.lock().await = Some(Running {
            state,
            server,
            shutdown,
            timeout: Duration::from_secs(settings.shutdown_timeout),
        });
        self.status.mark_up();

        info!("🌐 HTTP transport listening on {}", local_addr);
        info!("🔌 WebSocket endpoint at {}", settings.messages_route());
        Ok(())
    }

    async fn teardown(&self, _kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
        let running = self.running.lock().await.take();
        *self.local_addr.write().await = None;
        self.status.mark_down();

        let Some(mut running) = running else {
            return Ok(());
        };

        info!(
            "🧹 Closing {} connection(s) and stopping HTTP transport",
            running.state.connection_count()
        );
        running.state.close_connections();
        running.state.release_metrics();
        let _ = running.shutdown.send(());

        match tokio::time::timeout(running.timeout, &mut running.server).await {
            Ok(Ok(Ok(()))) => {
                info!("✅ HTTP transport stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(SystemError::other("HTTP server failed", e)),
            Ok(Err(e)) => Err(SystemError::other("HTTP server task failed", e)),
            Err(_) => {
                warn!(
                    "⚠️ HTTP transport did not stop within {:?}, aborting",
                    running.timeout
                );
                running.server.abort();
                Err(SystemError::failed(format!(
                    "HTTP transport did not stop within {}s",
                    running.timeout.as_secs()
                )))
            }
        }
    }

    fn status(&self) -> Status {
        self.status.get()
    }
}
