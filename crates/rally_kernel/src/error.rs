//! Error types for the lifecycle kernel and the subsystems it manages.

use std::fmt;
use std::path::PathBuf;

/// Errors raised while loading or reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config syntax error: {0}")]
    Syntax(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A named system could not be resolved.
///
/// Lookups only fail when the process was wired incorrectly, so both
/// variants are classified as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("system `{0}` is not registered")]
    NotRegistered(String),
    #[error("system `{name}` is not a `{expected}`")]
    TypeMismatch { name: String, expected: &'static str },
}

/// Error returned by a subsystem from `setup` or `teardown`.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("dependency `{0}` is not up")]
    DependencyDown(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
    #[error("{context}: {source}")]
    Other {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SystemError {
    pub fn failed(message: impl Into<String>) -> Self {
        SystemError::Failed(message.into())
    }

    pub fn other<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SystemError::Other {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SystemError::Lookup(_))
    }
}

/// A subsystem that failed to tear down during `Kernel::stop`.
#[derive(Debug)]
pub struct TeardownFailure {
    pub name: String,
    pub runlevel: u32,
    pub error: SystemError,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` (runlevel {}): {}", self.name, self.runlevel, self.error)
    }
}

/// Errors surfaced by the kernel itself.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("system `{0}` is already registered")]
    DuplicateSystem(String),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("system `{name}` failed to set up at runlevel {runlevel}")]
    Setup {
        name: String,
        runlevel: u32,
        #[source]
        source: SystemError,
    },
    #[error("{} system(s) failed to tear down: {}", .0.len(), summarize(.0))]
    Teardown(Vec<TeardownFailure>),
}

impl KernelError {
    /// Programmer errors in wiring the process, as opposed to runtime failures.
    pub fn is_fatal(&self) -> bool {
        match self {
            KernelError::DuplicateSystem(_) | KernelError::Lookup(_) => true,
            KernelError::Setup { source, .. } => source.is_fatal(),
            KernelError::Teardown(_) => false,
        }
    }
}

fn summarize(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
