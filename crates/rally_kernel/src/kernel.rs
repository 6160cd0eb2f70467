//! Runlevel-ordered registry and lifecycle driver.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::error::{KernelError, LookupError, TeardownFailure};
use crate::status::Status;
use crate::subsystem::Subsystem;

struct Entry {
    runlevel: u32,
    system: Arc<dyn Subsystem>,
}

/// Owns every managed subsystem and drives their setup and teardown.
///
/// Subsystems are grouped into runlevels. [`Kernel::start`] sets up runlevels
/// in ascending order and [`Kernel::stop`] tears them down in descending
/// order, so a subsystem may look up anything registered at a lower runlevel
/// during its own setup and find it already `Up`. Ordering between
/// subsystems sharing a runlevel is unspecified.
///
/// Registration takes `&mut self` and must finish before the kernel is
/// shared; after that the maps are read-only.
pub struct Kernel {
    config: SystemConfig,
    systems: HashMap<String, Entry>,
    runlevels: BTreeMap<u32, Vec<String>>,
}

impl Kernel {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            systems: HashMap::new(),
            runlevels: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Registers `system` under `name` at `runlevel`.
    ///
    /// Names are unique across all runlevels; a second registration under
    /// the same name fails with the fatal [`KernelError::DuplicateSystem`].
    pub fn register<S>(&mut self, runlevel: u32, name: &str, system: S) -> Result<(), KernelError>
    where
        S: Subsystem,
    {
        self.register_arc(runlevel, name, Arc::new(system))
    }

    pub fn register_arc(
        &mut self,
        runlevel: u32,
        name: &str,
        system: Arc<dyn Subsystem>,
    ) -> Result<(), KernelError> {
        if self.systems.contains_key(name) {
            error!("❌ System {} is already registered", name);
            return Err(KernelError::DuplicateSystem(name.to_string()));
        }

        self.systems
            .insert(name.to_string(), Entry { runlevel, system });
        self.runlevels
            .entry(runlevel)
            .or_default()
            .push(name.to_string());
        debug!("Registered system {} at runlevel {}", name, runlevel);
        Ok(())
    }

    /// Replaces an already-registered system, keeping its runlevel.
    pub fn replace<S>(&mut self, name: &str, system: S) -> Result<(), KernelError>
    where
        S: Subsystem,
    {
        let entry = self
            .systems
            .get_mut(name)
            .ok_or_else(|| LookupError::NotRegistered(name.to_string()))?;
        entry.system = Arc::new(system);
        debug!("Replaced system {} at runlevel {}", name, entry.runlevel);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.systems.contains_key(name)
    }

    /// Returns the system registered under `name`.
    pub fn system(&self, name: &str) -> Result<Arc<dyn Subsystem>, LookupError> {
        self.systems
            .get(name)
            .map(|entry| Arc::clone(&entry.system))
            .ok_or_else(|| LookupError::NotRegistered(name.to_string()))
    }

    /// Returns the system registered under `name` as its concrete type.
    pub fn lookup<T: Subsystem>(&self, name: &str) -> Result<Arc<T>, LookupError> {
        self.system(name)?
            .into_any()
            .downcast::<T>()
            .map_err(|_| LookupError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn status(&self, name: &str) -> Result<Status, LookupError> {
        Ok(self.system(name)?.status())
    }

    pub fn runlevel_of(&self, name: &str) -> Option<u32> {
        self.systems.get(name).map(|entry| entry.runlevel)
    }

    /// Distinct runlevels in ascending order.
    pub fn runlevels(&self) -> Vec<u32> {
        self.runlevels.keys().copied().collect()
    }

    /// Names registered at `runlevel`, in registration order.
    pub fn names_at(&self, runlevel: u32) -> &[String] {
        self.runlevels
            .get(&runlevel)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sets up every system, lowest runlevel first.
    ///
    /// The first failing setup aborts the walk and is returned wrapped with
    /// the system's name and runlevel. Systems that were already set up are
    /// left running; call [`Kernel::stop`] to tear them down.
    pub async fn start(&self) -> Result<(), KernelError> {
        info!(
            "🚀 Starting {} systems across {} runlevels",
            self.systems.len(),
            self.runlevels.len()
        );

        for (&runlevel, names) in &self.runlevels {
            debug!("Entering runlevel {}", runlevel);
            for name in names {
                let system = self.system(name)?;
                let config = self.config.subconfig(name);

                if let Err(source) = system.setup(self, &config).await {
                    error!(
                        "❌ System {} failed to set up at runlevel {}: {}",
                        name, runlevel, source
                    );
                    return Err(KernelError::Setup {
                        name: name.clone(),
                        runlevel,
                        source,
                    });
                }

                info!("✅ System {} set up ({})", name, system.status());
            }
        }

        Ok(())
    }

    /// Tears down every system that is `Up`, highest runlevel first.
    ///
    /// Failures are logged and collected; the walk always visits every
    /// runlevel. Systems that never came up are skipped.
    pub async fn stop(&self) -> Result<(), KernelError> {
        info!("🛑 Stopping systems");
        let mut failures = Vec::new();

        for (&runlevel, names) in self.runlevels.iter().rev() {
            debug!("Leaving runlevel {}", runlevel);
            for name in names {
                let system = self.system(name)?;
                if !system.status().is_up() {
                    debug!("Skipping teardown of {} (down)", name);
                    continue;
                }

                let config = self.config.subconfig(name);
                match system.teardown(self, &config).await {
                    Ok(()) => info!("🔌 System {} torn down", name),
                    Err(error) => {
                        warn!("⚠️ System {} failed to tear down: {}", name, error);
                        failures.push(TeardownFailure {
                            name: name.clone(),
                            runlevel,
                            error,
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(KernelError::Teardown(failures))
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(SystemConfig::empty())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("runlevels", &self.runlevels)
            .finish_non_exhaustive()
    }
}
