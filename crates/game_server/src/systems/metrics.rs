//! The `metrics` subsystem: a Prometheus registry exposed over HTTP.
//!
//! Other subsystems register collectors on [`MetricsSystem::registry`]. The
//! HTTP transport serves [`MetricsSystem::render`] at the configured path
//! while this subsystem is up.

use async_trait::async_trait;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use rally_kernel::{ConfigError, Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

pub const DEFAULT_NAMESPACE: &str = "rally";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enable: bool,
    pub path: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enable: true,
            path: "/metrics".to_string(),
        }
    }
}

impl MetricsSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let settings: MetricsSettings = config.deserialize()?;
        if !settings.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "metrics path '{}' must start with '/'",
                settings.path
            )));
        }
        Ok(settings)
    }
}

/// Owns the process-wide metrics registry.
pub struct MetricsSystem {
    registry: Registry,
    namespace: String,
    settings: RwLock<MetricsSettings>,
    start_time: IntGauge,
    status: StatusFlag,
}

impl MetricsSystem {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    /// Every metric registered through this system is prefixed with
    /// `<namespace>_`.
    pub fn with_namespace(namespace: &str) -> Self {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)
            .unwrap_or_else(|_| Registry::new());
        let start_time = IntGauge::new("start_time_seconds", "Unix time the metrics system came up")
            .expect("metric creation failed");

        Self {
            registry,
            namespace: namespace.to_string(),
            settings: RwLock::new(MetricsSettings::default()),
            start_time,
            status: StatusFlag::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn path(&self) -> String {
        self.settings.read().await.path.clone()
    }

    pub fn register_counter(
        &self,
        name: &str,
        help: &str,
    ) -> Result<IntCounter, prometheus::Error> {
        let counter = IntCounter::new(name, help)?;
        self.registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
        let gauge = Gauge::with_opts(Opts::new(name, help))?;
        self.registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        buckets: Vec<f64>,
    ) -> Result<Histogram, prometheus::Error> {
        let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))?;
        self.registry.register(Box::new(histogram.clone()))?;
        Ok(histogram)
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl Default for MetricsSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subsystem for MetricsSystem {
    async fn setup(&self, _kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError> {
        let settings = MetricsSettings::from_config(config)?;
        let enabled = settings.enable;
        let path = settings.path.clone();
        *self.settings.write().await = settings;

        if !enabled {
            info!("📊 Metrics disabled");
            return Ok(());
        }

        self.registry
            .register(Box::new(self.start_time.clone()))
            .map_err(|e| SystemError::other("failed to register metrics", e))?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        self.start_time.set(now);

        self.status.mark_up();
        info!("📊 Metrics available at {} (namespace: {})", path, self.namespace);
        Ok(())
    }

    async fn teardown(&self, _kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
        let _ = self.registry.unregister(Box::new(self.start_time.clone()));
        self.status.mark_down();
        Ok(())
    }

    fn status(&self) -> Status {
        self.status.get()
    }
}
