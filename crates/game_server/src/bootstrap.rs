//! Assembles a kernel with the default subsystem set.

use std::sync::Arc;

use rally_dispatch::{MessageRouter, RegistryError, Service, ServiceRegistry};
use rally_kernel::{Kernel, KernelError, SystemConfig};
use tracing::debug;

use crate::services::PingService;
use crate::systems::metrics::DEFAULT_NAMESPACE;
use crate::systems::{
    runlevel, ClusterSystem, DiscoverySystem, LoggerSystem, MetricsSystem, CLUSTER, DISCOVERY,
    HTTP, LOGGER, METRICS, SERVICES,
};
use crate::transport::HttpTransport;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Builds a [`Kernel`] holding the logger, metrics, discovery, cluster,
/// services and http subsystems.
///
/// The ping service is always registered; application services are added
/// with [`ServerBuilder::with_service`]. Registration happens here, so
/// duplicate service paths surface from [`ServerBuilder::build`] before any
/// subsystem is started.
pub struct ServerBuilder {
    config: SystemConfig,
    services: Vec<Arc<dyn Service>>,
}

impl ServerBuilder {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            services: vec![Arc::new(PingService::new())],
        }
    }

    pub fn with_service<S: Service>(mut self, service: S) -> Self {
        self.services.push(Arc::new(service));
        self
    }

    pub fn with_service_arc(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> Result<Kernel, BootstrapError> {
        let namespace = self
            .config
            .get_str("metrics.namespace")
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string();
        let metrics = MetricsSystem::with_namespace(&namespace);

        let mut registry = ServiceRegistry::new();
        for service in self.services {
            registry.register_arc(service)?;
        }
        debug!("Registered services: {:?}", registry.paths());
        let router = MessageRouter::new(registry).with_metrics(metrics.registry().clone());

        let mut kernel = Kernel::new(self.config);
        kernel.register(runlevel::LOGGER, LOGGER, LoggerSystem::new())?;
        kernel.register(runlevel::METRICS, METRICS, metrics)?;
        kernel.register(runlevel::DISCOVERY, DISCOVERY, DiscoverySystem::new())?;
        kernel.register(runlevel::CLUSTER, CLUSTER, ClusterSystem::new())?;
        kernel.register(runlevel::SERVICES, SERVICES, router)?;
        kernel.register(runlevel::HTTP, HTTP, HttpTransport::new())?;
        Ok(kernel)
    }
}

/// A kernel with the default subsystems and only the built-in services.
pub fn default_kernel(config: SystemConfig) -> Result<Kernel, BootstrapError> {
    ServerBuilder::new(config).build()
}
