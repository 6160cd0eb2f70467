//! The contract every managed subsystem implements.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SystemConfig;
use crate::error::SystemError;
use crate::kernel::Kernel;
use crate::status::Status;

/// Upcast helper used by [`Kernel::lookup`] to recover a concrete type.
///
/// Implemented for every `Send + Sync + 'static` type; there is no need to
/// implement it by hand.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A named, independently lifecycle-managed part of the server.
///
/// Subsystems are constructed before the kernel starts and are shared as
/// `Arc<dyn Subsystem>`, so all state changes go through interior
/// mutability. The kernel calls `setup` once in ascending runlevel order and
/// `teardown` in descending order, and only for subsystems whose `status`
/// reports [`Status::Up`] at that moment.
///
/// `config` is the subtree of the process configuration stored under the
/// subsystem's registered name, or an empty config when there is none.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use rally_kernel::{Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
///
/// #[derive(Default)]
/// struct Heartbeat {
///     status: StatusFlag,
/// }
///
/// #[async_trait]
/// impl Subsystem for Heartbeat {
///     async fn setup(&self, _kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
///         self.status.mark_up();
///         Ok(())
///     }
///
///     async fn teardown(
///         &self,
///         _kernel: &Kernel,
///         _config: &SystemConfig,
///     ) -> Result<(), SystemError> {
///         self.status.mark_down();
///         Ok(())
///     }
///
///     fn status(&self) -> Status {
///         self.status.get()
///     }
/// }
/// ```
#[async_trait]
pub trait Subsystem: AsAny {
    async fn setup(&self, kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError>;

    async fn teardown(&self, kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError>;

    fn status(&self) -> Status;
}
