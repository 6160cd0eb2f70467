//! # Rally Kernel
//!
//! The lifecycle kernel that wires a Rally server together. Every part of the
//! server (logging, metrics, discovery, clustering, message routing,
//! transports, and anything user-defined) is a [`Subsystem`] registered
//! under a unique name at a runlevel.
//!
//! ## Lifecycle
//!
//! * [`Kernel::start`] walks runlevels in ascending order and calls
//!   `setup` on each subsystem with its own configuration subtree. The first
//!   failure aborts startup.
//! * [`Kernel::stop`] walks runlevels in descending order and calls
//!   `teardown` on every subsystem that is still `Up`, collecting failures
//!   instead of stopping at the first one.
//!
//! Subsystems find each other by name through [`Kernel::lookup`] and may
//! only depend on names registered at strictly lower runlevels.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rally_kernel::{Kernel, SystemConfig};
//!
//! # async fn run() -> Result<(), rally_kernel::KernelError> {
//! let kernel = Kernel::new(SystemConfig::empty());
//! // kernel.register(0, "logger", LoggerSystem::default())?;
//! kernel.start().await?;
//! // ... serve ...
//! kernel.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod kernel;
pub mod status;
pub mod subsystem;

pub use config::{ConfigLoader, SystemConfig};
pub use error::{ConfigError, KernelError, LookupError, SystemError, TeardownFailure};
pub use kernel::Kernel;
pub use status::{Status, StatusFlag};
pub use subsystem::Subsystem;

pub use async_trait::async_trait;
