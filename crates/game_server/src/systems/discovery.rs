//! The `discovery` subsystem: service registration and change tracking.
//!
//! Instances are stored in a [`ServiceCatalog`]. The default catalog is the
//! in-process [`MemoryCatalog`], seeded from `peers` in the configuration;
//! other backends plug in through [`DiscoverySystem::with_catalog`].
//!
//! [`DiscoverySystem::track_service`] starts a background watch that polls
//! the catalog and reports instances appearing and disappearing.
//!
//! ```toml
//! [discovery]
//! enable = true
//! poll_interval_ms = 1000
//!
//! [[discovery.peers]]
//! id = "node-b"
//! service = "rally"
//! address = "10.0.0.2:8081"
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rally_kernel::{ConfigError, Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const UPDATE_BUFFER: usize = 64;

/// A registered instance of a named service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service: String,
    pub address: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceInstance {
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            address: address.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryUpdate {
    Added(ServiceInstance),
    Removed(ServiceInstance),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery is not enabled")]
    Disabled,
    #[error("catalog error: {0}")]
    Catalog(String),
}

/// A store of service instances.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError>;

    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError>;

    /// Instances of `service`, optionally restricted to those tagged `tag`.
    async fn instances(
        &self,
        service: &str,
        tag: Option<&str>,
    ) -> Result<Vec<ServiceInstance>, DiscoveryError>;
}

/// In-process catalog keyed by instance id.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    instances: DashMap<String, ServiceInstance>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl ServiceCatalog for MemoryCatalog {
    async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError> {
        self.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError> {
        self.instances.remove(id);
        Ok(())
    }

    async fn instances(
        &self,
        service: &str,
        tag: Option<&str>,
    ) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let mut found: Vec<ServiceInstance> = self
            .instances
            .iter()
            .filter(|entry| entry.service == service)
            .filter(|entry| tag.map_or(true, |t| entry.has_tag(t)))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

/// Compares the last known instances against the catalog's current view.
///
/// Instances are identified by address. `known` is updated in place.
pub fn diff_instances(
    known: &mut HashMap<String, ServiceInstance>,
    current: Vec<ServiceInstance>,
) -> Vec<DiscoveryUpdate> {
    let mut updates = Vec::new();
    let mut next: HashMap<String, ServiceInstance> = HashMap::with_capacity(current.len());
    for instance in current {
        next.insert(instance.address.clone(), instance);
    }

    let mut removed: Vec<ServiceInstance> = known
        .iter()
        .filter(|(address, _)| !next.contains_key(*address))
        .map(|(_, instance)| instance.clone())
        .collect();
    removed.sort_by(|a, b| a.address.cmp(&b.address));

    let mut added: Vec<ServiceInstance> = next
        .iter()
        .filter(|(address, _)| !known.contains_key(*address))
        .map(|(_, instance)| instance.clone())
        .collect();
    added.sort_by(|a, b| a.address.cmp(&b.address));

    updates.extend(removed.into_iter().map(DiscoveryUpdate::Removed));
    updates.extend(added.into_iter().map(DiscoveryUpdate::Added));
    *known = next;
    updates
}

/// Receives changes for one tracked service.
///
/// The watch task ends when [`ServiceTracker::stop`] is called, when the
/// tracker is dropped, or when the discovery subsystem shuts down.
pub struct ServiceTracker {
    service: String,
    updates: mpsc::Receiver<DiscoveryUpdate>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServiceTracker {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Waits for the next change. Returns `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<DiscoveryUpdate> {
        self.updates.recv().await
    }

    pub fn try_next(&mut self) -> Option<DiscoveryUpdate> {
        self.updates.try_recv().ok()
    }

    /// Stops the watch task and waits for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!("Stopped tracking {}", self.service);
    }
}

impl Drop for ServiceTracker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub enable: bool,
    pub poll_interval_ms: u64,
    pub peers: Vec<ServiceInstance>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enable: false,
            poll_interval_ms: 1000,
            peers: Vec::new(),
        }
    }
}

impl DiscoverySettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let settings: DiscoverySettings = config.deserialize()?;
        if settings.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(settings)
    }
}

/// The `discovery` subsystem.
pub struct DiscoverySystem {
    catalog: Arc<dyn ServiceCatalog>,
    settings: RwLock<DiscoverySettings>,
    shutdown: broadcast::Sender<()>,
    status: StatusFlag,
}

impl DiscoverySystem {
    pub fn new() -> Self {
        Self::with_catalog(Arc::new(MemoryCatalog::new()))
    }

    pub fn with_catalog(catalog: Arc<dyn ServiceCatalog>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            catalog,
            settings: RwLock::new(DiscoverySettings::default()),
            shutdown,
            status: StatusFlag::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn ServiceCatalog> {
        &self.catalog
    }

    fn ensure_up(&self) -> Result<(), DiscoveryError> {
        if self.status.get().is_up() {
            Ok(())
        } else {
            Err(DiscoveryError::Disabled)
        }
    }

    pub async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError> {
        self.ensure_up()?;
        debug!("Registering {} ({}) at {}", instance.id, instance.service, instance.address);
        self.catalog.register(instance).await
    }

    pub async fn deregister(&self, id: &str) -> Result<(), DiscoveryError> {
        self.ensure_up()?;
        debug!("Deregistering {}", id);
        self.catalog.deregister(id).await
    }

    pub async fn instances(
        &self,
        service: &str,
        tag: Option<&str>,
    ) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        self.ensure_up()?;
        self.catalog.instances(service, tag).await
    }

    /// Starts watching `service` for instances appearing and disappearing.
    ///
    /// The first poll reports every existing instance as added.
    pub async fn track_service(
        &self,
        service: &str,
        tag: Option<&str>,
    ) -> Result<ServiceTracker, DiscoveryError> {
        self.ensure_up()?;

        let poll_interval = Duration::from_millis(self.settings.read().await.poll_interval_ms);
        let (updates_tx, updates) = mpsc::channel(UPDATE_BUFFER);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(watch_service(
            Arc::clone(&self.catalog),
            service.to_string(),
            tag.map(str::to_string),
            poll_interval,
            updates_tx,
            stop_rx,
            self.shutdown.subscribe(),
        ));

        info!("🔭 Tracking service {} every {:?}", service, poll_interval);
        Ok(ServiceTracker {
            service: service.to_string(),
            updates,
            stop: Some(stop),
            task: Some(task),
        })
    }
}

impl Default for DiscoverySystem {
    fn default() -> Self {
        Self::new()
    }
}

async fn watch_service(
    catalog: Arc<dyn ServiceCatalog>,
    service: String,
    tag: Option<String>,
    poll_interval: Duration,
    updates: mpsc::Sender<DiscoveryUpdate>,
    mut stop: oneshot::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut known = HashMap::new();
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let current = match catalog.instances(&service, tag.as_deref()).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("⚠️ Failed to query instances of {}: {}", service, e);
                        continue;
                    }
                };

                for update in diff_instances(&mut known, current) {
                    if updates.send(update).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Subsystem for DiscoverySystem {
    async fn setup(&self, _kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError> {
        let settings = DiscoverySettings::from_config(config)?;
        if !settings.enable {
            info!("🔭 Discovery disabled");
            *self.settings.write().await = settings;
            return Ok(());
        }

        for peer in &settings.peers {
            self.catalog
                .register(peer.clone())
                .await
                .map_err(|e| {
                    SystemError::other(format!("failed to register peer {}", peer.id), e)
                })?;
        }

        info!("🔭 Discovery up with {} static peers", settings.peers.len());
        *self.settings.write().await = settings;
        self.status.mark_up();
        Ok(())
    }

    async fn teardown(&self, _kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
        let _ = self.shutdown.send(());
        self.status.mark_down();
        Ok(())
    }

    fn status(&self) -> Status {
        self.status.get()
    }
}
