//! The `cluster` subsystem: membership of this node among its peers.
//!
//! When enabled, the node registers itself with `discovery` under the
//! cluster name and tracks the other instances registered under the same
//! name.
//!
//! ```toml
//! [cluster]
//! enable = true
//! name = "rally"
//! address = "10.0.0.1:8081"
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rally_kernel::{ConfigError, Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::discovery::{DiscoverySystem, DiscoveryUpdate, ServiceInstance, ServiceTracker};
use super::DISCOVERY;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub enable: bool,
    pub name: String,
    pub address: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enable: false,
            name: "rally".to_string(),
            address: "127.0.0.1:8081".to_string(),
        }
    }
}

impl ClusterSettings {
    pub fn from_config(config: &SystemConfig) -> Result<Self, ConfigError> {
        let settings: ClusterSettings = config.deserialize()?;
        if settings.name.is_empty() {
            return Err(ConfigError::Invalid("cluster name must not be empty".to_string()));
        }
        Ok(settings)
    }

    /// Stable node id derived from the cluster name and node address.
    pub fn node_id(&self) -> Uuid {
        Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}/{}", self.name, self.address).as_bytes(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterNode {
    pub id: String,
    pub address: String,
    pub local: bool,
}

struct Membership {
    node_id: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The `cluster` subsystem.
#[derive(Default)]
pub struct ClusterSystem {
    nodes: Arc<DashMap<String, ClusterNode>>,
    membership: Mutex<Option<Membership>>,
    status: StatusFlag,
}

impl ClusterSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live members keyed by address, this node included.
    pub fn nodes(&self) -> Vec<ClusterNode> {
        let mut nodes: Vec<ClusterNode> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        nodes
    }

    pub fn is_member(&self, address: &str) -> bool {
        self.nodes.contains_key(address)
    }

    pub async fn node_id(&self) -> Option<String> {
        self.membership.lock().await.as_ref().map(|m| m.node_id.clone())
    }
}

async fn follow_members(
    mut tracker: ServiceTracker,
    nodes: Arc<DashMap<String, ClusterNode>>,
    local_address: String,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            update = tracker.next() => match update {
                Some(DiscoveryUpdate::Added(instance)) => {
                    if instance.address != local_address {
                        info!("🤝 Node {} joined at {}", instance.id, instance.address);
                    }
                    nodes.insert(
                        instance.address.clone(),
                        ClusterNode {
                            local: instance.address == local_address,
                            id: instance.id,
                            address: instance.address,
                        },
                    );
                }
                Some(DiscoveryUpdate::Removed(instance)) => {
                    if instance.address != local_address {
                        info!("👋 Node {} left ({})", instance.id, instance.address);
                        nodes.remove(&instance.address);
                    }
                }
                None => break,
            }
        }
    }
    tracker.stop().await;
}

#[async_trait]
impl Subsystem for ClusterSystem {
    async fn setup(&self, kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError> {
        let settings = ClusterSettings::from_config(config)?;
        if !settings.enable {
            info!("🌐 Clustering disabled");
            return Ok(());
        }

        let discovery = kernel.lookup::<DiscoverySystem>(DISCOVERY)?;
        if !discovery.status().is_up() {
            return Err(SystemError::DependencyDown(DISCOVERY.to_string()));
        }

        let node_id = settings.node_id().to_string();
        let local = ServiceInstance::new(&node_id, &settings.name, &settings.address);
        discovery
            .register(local)
            .await
            .map_err(|e| SystemError::other("failed to register cluster node", e))?;

        self.nodes.insert(
            settings.address.clone(),
            ClusterNode {
                id: node_id.clone(),
                address: settings.address.clone(),
                local: true,
            },
        );

        let tracker = discovery
            .track_service(&settings.name, None)
            .await
            .map_err(|e| SystemError::other("failed to track cluster members", e))?;
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(follow_members(
            tracker,
            Arc::clone(&self.nodes),
            settings.address.clone(),
            stop_rx,
        ));

        *self.membership.lock().await = Some(Membership {
            node_id: node_id.clone(),
            stop,
            task,
        });
        self.status.mark_up();
        info!("🌐 Joined cluster {} as {} ({})", settings.name, node_id, settings.address);
        Ok(())
    }

    async fn teardown(&self, kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
        let membership = self.membership.lock().await.take();
        self.nodes.clear();
        self.status.mark_down();

        let Some(membership) = membership else {
            return Ok(());
        };
        let _ = membership.stop.send(());
        if let Err(e) = membership.task.await {
            warn!("⚠️ Cluster membership task ended abnormally: {}", e);
        }

        let discovery = kernel.lookup::<DiscoverySystem>(DISCOVERY)?;
        discovery
            .deregister(&membership.node_id)
            .await
            .map_err(|e| SystemError::other("failed to deregister cluster node", e))?;
        info!("🌐 Left cluster as {}", membership.node_id);
        Ok(())
    }

    fn status(&self) -> Status {
        self.status.get()
    }
}
