//! Default subsystems and the names/runlevels they are registered under.

pub mod cluster;
pub mod discovery;
pub mod logger;
pub mod metrics;

pub use cluster::{ClusterNode, ClusterSettings, ClusterSystem};
pub use discovery::{
    DiscoveryError, DiscoverySettings, DiscoverySystem, DiscoveryUpdate, MemoryCatalog,
    ServiceCatalog, ServiceInstance, ServiceTracker,
};
pub use logger::{LogFormat, LoggerSettings, LoggerSystem};
pub use metrics::{MetricsSettings, MetricsSystem};

pub const LOGGER: &str = "logger";
pub const METRICS: &str = "metrics";
pub const DISCOVERY: &str = "discovery";
pub const CLUSTER: &str = "cluster";
pub const SERVICES: &str = rally_dispatch::SERVICES_SYSTEM;
pub const HTTP: &str = "http";

/// Runlevels of the default subsystem set.
pub mod runlevel {
    pub const LOGGER: u32 = 0;
    pub const METRICS: u32 = 1;
    pub const DISCOVERY: u32 = 1;
    pub const CLUSTER: u32 = 2;
    pub const SERVICES: u32 = 3;
    pub const HTTP: u32 = 4;
}
